use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::RouterError;
use crate::messages::Envelope;

/// An envelope together with how many times it has been handed to a handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    /// 0 on first delivery
    pub attempt: u32,
}

/// Sending half of the router's bounded inbox.
///
/// Cloned into every producer: the timer service, the transport, the admin
/// API, and the router itself for fan-out and redelivery.
#[derive(Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Delivery>,
    in_flight: Arc<AtomicU64>,
}

/// Create the inbox and its receiving half.
pub fn channel(capacity: usize) -> (Inbox, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Inbox {
            tx,
            in_flight: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl Inbox {
    /// Submit a new envelope.
    pub async fn send(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.push(Delivery {
            envelope,
            attempt: 0,
        })
        .await
    }

    /// Re-submit a delivery that is already counted as in flight.
    pub(crate) async fn redeliver(&self, delivery: Delivery) -> Result<(), RouterError> {
        self.push(delivery).await
    }

    async fn push(&self, delivery: Delivery) -> Result<(), RouterError> {
        if self.tx.send(delivery).await.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(RouterError::Closed);
        }
        Ok(())
    }

    /// Mark one delivery as finished (handled, dropped, or dead-lettered).
    pub(crate) fn done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Envelopes submitted and not yet finished, including pending redeliveries.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
