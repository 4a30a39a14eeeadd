use anyhow::Result;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// OTEL Metrics with Prometheus exporter
pub struct Metrics {
    registry: Registry,
    meter_provider: SdkMeterProvider,
}

impl Metrics {
    /// Create metrics with OTEL → Prometheus pipeline
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let exporter = exporter().with_registry(registry.clone()).build()?;

        let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

        // Register as global meter provider
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        info!("OTEL metrics configured with Prometheus exporter");

        Ok(Arc::new(Self {
            registry,
            meter_provider,
        }))
    }

    /// Get meter provider
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    /// Get a meter for recording metrics
    pub fn meter(&self, name: &'static str) -> opentelemetry::metrics::Meter {
        self.meter_provider.meter(name)
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

impl Drop for Metrics {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            tracing::warn!(error = %e, "failed to shutdown meter provider");
        }
    }
}

/// Scheduler metrics with trickle_* prefix
pub mod counters {
    use opentelemetry::metrics::{Counter, Gauge, Histogram};
    use opentelemetry::KeyValue;
    use std::sync::OnceLock;

    // Batches
    static BATCHES_CREATED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static BATCHES_COMPLETED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static BATCH_SIZE: OnceLock<Histogram<u64>> = OnceLock::new();

    // Scheduled messages
    static SCHEDULES_CREATED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static TIMER_FIRES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static TIMERS_PENDING: OnceLock<Gauge<i64>> = OnceLock::new();
    static SENDS_DISPATCHED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static CONFIRMATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static SEND_COST_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // Router
    static ENVELOPES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static ENVELOPE_DURATION: OnceLock<Histogram<f64>> = OnceLock::new();
    static IGNORED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static INVARIANT_VIOLATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static STORE_CONFLICTS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static REDELIVERIES_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static DEAD_LETTERS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // Tracking
    static TRACKING_EVENTS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    /// Register all instruments on `meter`. Later calls are no-ops.
    pub fn init(meter: &opentelemetry::metrics::Meter) {
        let _ = BATCHES_CREATED_TOTAL.set(
            meter
                .u64_counter("trickle_batches_created_total")
                .with_description("Batches accepted, by trickle policy")
                .build(),
        );
        let _ = BATCHES_COMPLETED_TOTAL.set(
            meter
                .u64_counter("trickle_batches_completed_total")
                .with_description("Batches that resolved every message")
                .build(),
        );
        let _ = BATCH_SIZE.set(
            meter
                .u64_histogram("trickle_batch_size_messages")
                .with_description("Messages per batch")
                .build(),
        );
        let _ = SCHEDULES_CREATED_TOTAL.set(
            meter
                .u64_counter("trickle_schedules_created_total")
                .with_description("Scheduled messages created")
                .build(),
        );
        let _ = TIMER_FIRES_TOTAL.set(
            meter
                .u64_counter("trickle_timer_fires_total")
                .with_description("Timer fires by result")
                .build(),
        );
        let _ = TIMERS_PENDING.set(
            meter
                .i64_gauge("trickle_timers_pending")
                .with_description("Registered timers not yet fired")
                .build(),
        );
        let _ = SENDS_DISPATCHED_TOTAL.set(
            meter
                .u64_counter("trickle_sends_dispatched_total")
                .with_description("Messages handed to the transport")
                .build(),
        );
        let _ = CONFIRMATIONS_TOTAL.set(
            meter
                .u64_counter("trickle_confirmations_total")
                .with_description("Transport confirmations by outcome")
                .build(),
        );
        let _ = SEND_COST_TOTAL.set(
            meter
                .u64_counter("trickle_send_cost_total")
                .with_description("Reported send cost, smallest currency unit")
                .build(),
        );
        let _ = ENVELOPES_TOTAL.set(
            meter
                .u64_counter("trickle_envelopes_total")
                .with_description("Envelopes handled by kind and result")
                .build(),
        );
        let _ = ENVELOPE_DURATION.set(
            meter
                .f64_histogram("trickle_envelope_duration_seconds")
                .with_description("Load-decide-save-act duration per envelope")
                .build(),
        );
        let _ = IGNORED_TOTAL.set(
            meter
                .u64_counter("trickle_ignored_total")
                .with_description("Envelopes dropped without a state change, by reason")
                .build(),
        );
        let _ = INVARIANT_VIOLATIONS_TOTAL.set(
            meter
                .u64_counter("trickle_invariant_violations_total")
                .with_description("Envelopes contradicting stored state")
                .build(),
        );
        let _ = STORE_CONFLICTS_TOTAL.set(
            meter
                .u64_counter("trickle_store_conflicts_total")
                .with_description("Optimistic concurrency conflicts by record kind")
                .build(),
        );
        let _ = REDELIVERIES_TOTAL.set(
            meter
                .u64_counter("trickle_redeliveries_total")
                .with_description("Envelopes scheduled for redelivery")
                .build(),
        );
        let _ = DEAD_LETTERS_TOTAL.set(
            meter
                .u64_counter("trickle_dead_letters_total")
                .with_description("Envelopes dropped after exhausting redeliveries")
                .build(),
        );
        let _ = TRACKING_EVENTS_TOTAL.set(
            meter
                .u64_counter("trickle_tracking_events_total")
                .with_description("Tracking events published by type")
                .build(),
        );
    }

    pub fn batch_created(policy: &str, size: usize) {
        if let Some(c) = BATCHES_CREATED_TOTAL.get() {
            c.add(1, &[kv("policy", policy)]);
        }
        if let Some(h) = BATCH_SIZE.get() {
            h.record(size as u64, &[kv("policy", policy)]);
        }
    }

    pub fn batch_completed() {
        if let Some(c) = BATCHES_COMPLETED_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    pub fn schedule_created() {
        if let Some(c) = SCHEDULES_CREATED_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    /// Record a timer fire; `result` is "sent" or an ignore reason.
    pub fn timer_fired(result: &str) {
        if let Some(c) = TIMER_FIRES_TOTAL.get() {
            c.add(1, &[kv("result", result)]);
        }
    }

    pub fn timers_pending(count: usize) {
        if let Some(g) = TIMERS_PENDING.get() {
            g.record(count as i64, &[]);
        }
    }

    pub fn send_dispatched() {
        if let Some(c) = SENDS_DISPATCHED_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    pub fn confirmation(outcome: &str, cost: i64) {
        if let Some(c) = CONFIRMATIONS_TOTAL.get() {
            c.add(1, &[kv("outcome", outcome)]);
        }
        if cost > 0 {
            if let Some(c) = SEND_COST_TOTAL.get() {
                c.add(cost as u64, &[]);
            }
        }
    }

    pub fn envelope_handled(kind: &str, result: &str, duration_secs: f64) {
        if let Some(c) = ENVELOPES_TOTAL.get() {
            c.add(1, &[kv("kind", kind), kv("result", result)]);
        }
        if let Some(h) = ENVELOPE_DURATION.get() {
            h.record(duration_secs, &[kv("kind", kind)]);
        }
    }

    /// Record an envelope dropped without effect (stale control, duplicate, ...).
    pub fn ignored(kind: &str, reason: &str) {
        if let Some(c) = IGNORED_TOTAL.get() {
            c.add(1, &[kv("kind", kind), kv("reason", reason)]);
        }
    }

    pub fn invariant_violation(kind: &str) {
        if let Some(c) = INVARIANT_VIOLATIONS_TOTAL.get() {
            c.add(1, &[kv("kind", kind)]);
        }
    }

    pub fn store_conflict(record: &str) {
        if let Some(c) = STORE_CONFLICTS_TOTAL.get() {
            c.add(1, &[kv("record", record)]);
        }
    }

    pub fn redelivery(kind: &str) {
        if let Some(c) = REDELIVERIES_TOTAL.get() {
            c.add(1, &[kv("kind", kind)]);
        }
    }

    pub fn dead_letter(kind: &str) {
        if let Some(c) = DEAD_LETTERS_TOTAL.get() {
            c.add(1, &[kv("kind", kind)]);
        }
    }

    pub fn tracking_event(name: &str) {
        if let Some(c) = TRACKING_EVENTS_TOTAL.get() {
            c.add(1, &[kv("event", name)]);
        }
    }

    // Helper function to create KeyValue
    #[inline]
    fn kv(key: &'static str, value: &str) -> KeyValue {
        KeyValue::new(key, value.to_string())
    }
}
