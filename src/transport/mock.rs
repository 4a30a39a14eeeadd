//! Mock transport for running without an SMS gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use super::{Transport, TransportError};
use crate::config::MockTransportConfig;
use crate::messages::{Envelope, SendConfirmed, SendNow, SendOutcome};
use crate::router::Inbox;

/// Mock transport that confirms every send after a simulated latency.
///
/// Failures are deterministic: with a failure rate `r`, the send whose
/// counter value modulo 100 falls below `r * 100` is reported failed.
pub struct MockTransport {
    inbox: Inbox,
    latency: Duration,
    failure_rate: f64,
    cost: i64,
    /// Message ID counter
    message_counter: AtomicU64,
    request_count: Arc<AtomicU64>,
    delivered_count: Arc<AtomicU64>,
    failed_count: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn new(config: &MockTransportConfig, inbox: Inbox) -> Arc<Self> {
        Arc::new(Self {
            inbox,
            latency: config.latency,
            failure_rate: config.failure_rate,
            cost: config.cost,
            message_counter: AtomicU64::new(1),
            request_count: Arc::new(AtomicU64::new(0)),
            delivered_count: Arc::new(AtomicU64::new(0)),
            failed_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Generate the outcome for the next send.
    fn next_outcome(&self) -> SendOutcome {
        let counter = self.message_counter.fetch_add(1, Ordering::Relaxed);
        let is_error = (counter % 100) < (self.failure_rate * 100.0) as u64;

        if is_error {
            SendOutcome::Failed {
                reason: "mock failure".to_string(),
                failed_at_utc: Utc::now(),
            }
        } else {
            SendOutcome::Delivered {
                receipt: format!("MOCK{:016X}", counter),
                sent_at_utc: Utc::now(),
                cost: self.cost,
            }
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, cmd: SendNow) -> Result<(), TransportError> {
        if self.inbox.is_closed() {
            return Err(TransportError::Unavailable("router inbox closed".into()));
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency;
        let outcome = self.next_outcome();
        let inbox = self.inbox.clone();
        let counter = if outcome.is_delivered() {
            self.delivered_count.clone()
        } else {
            self.failed_count.clone()
        };

        debug!(
            schedule_id = %cmd.schedule_id,
            target = %cmd.payload.target_address,
            outcome = outcome.as_str(),
            "mock send accepted"
        );

        tokio::spawn(async move {
            if !latency.is_zero() {
                trace!(latency_ms = latency.as_millis() as u64, "simulating latency");
                sleep(latency).await;
            }
            counter.fetch_add(1, Ordering::Relaxed);

            let confirmed = Envelope::SendConfirmed(SendConfirmed {
                schedule_id: cmd.schedule_id,
                outcome,
            });
            if let Err(e) = inbox.send(confirmed).await {
                warn!(schedule_id = %cmd.schedule_id, error = %e, "confirmation not delivered");
            }
        });

        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
