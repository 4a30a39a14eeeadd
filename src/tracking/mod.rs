//! Tracking event bus.
//!
//! State machines emit [`TrackingEvent`]s as effects; the router publishes
//! them here after the state that produced them is persisted. Reporting
//! consumers subscribe. [`TrackingLog`] is the built-in consumer and writes
//! every event to the log.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::bootstrap::ShutdownState;
use crate::messages::TrackingEvent;
use crate::telemetry::counters;

/// Broadcast bus for tracking events.
///
/// Uses broadcast channels to allow multiple subscribers. Publishing with no
/// subscriber drops the event.
pub struct EventBus {
    tx: broadcast::Sender<TrackingEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Publish an event
    pub fn publish(&self, event: TrackingEvent) {
        debug!(event = event.name(), batch_id = %event.batch_id(), "publishing tracking event");
        counters::tracking_event(event.name());
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }
}

/// Log-based tracking consumer.
pub struct TrackingLog {
    rx: broadcast::Receiver<TrackingEvent>,
    shutdown_rx: watch::Receiver<ShutdownState>,
}

impl TrackingLog {
    pub fn new(bus: &EventBus, shutdown_rx: watch::Receiver<ShutdownState>) -> Self {
        Self {
            rx: bus.subscribe(),
            shutdown_rx,
        }
    }

    /// Consume until shutdown terminates or the bus closes.
    ///
    /// Keeps consuming while draining so the last events of in-flight
    /// envelopes are still recorded.
    pub async fn run(mut self) {
        info!("tracking consumer started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow_and_update() == ShutdownState::Terminated {
                        info!("tracking consumer shutting down");
                        break;
                    }
                }

                event = self.rx.recv() => match event {
                    Ok(event) => record(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "tracking consumer lagged, events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("tracking bus closed");
                        break;
                    }
                },
            }
        }
    }
}

fn record(event: &TrackingEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(
            target: "trickled::tracking",
            event = event.name(),
            batch_id = %event.batch_id(),
            payload = %json,
            "tracking event"
        ),
        Err(e) => warn!(event = event.name(), error = %e, "failed to encode tracking event"),
    }
}
