use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::router::Inbox;

/// Shutdown state machine
///
/// States:
/// 1. Running - normal operation
/// 2. Draining - no new batches or control requests, in-flight envelopes finish
/// 3. Terminated - router stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Terminated,
}

/// Manages graceful shutdown with drain period
pub struct ShutdownManager {
    /// Current state
    state: watch::Sender<ShutdownState>,

    /// Drain period duration
    drain_period: Duration,

    /// Shutdown complete signal
    complete_tx: broadcast::Sender<()>,
}

impl ShutdownManager {
    pub fn new(drain_period: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(ShutdownState::Running);
        let (complete_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            state,
            drain_period,
            complete_tx,
        })
    }

    /// Get current state
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Subscribe to shutdown complete
    pub fn complete_signal(&self) -> broadcast::Receiver<()> {
        self.complete_tx.subscribe()
    }

    /// Start draining (called on SIGTERM/SIGINT)
    pub fn start_drain(&self) {
        if self.state() != ShutdownState::Running {
            return;
        }

        info!(
            drain_period_secs = self.drain_period.as_secs(),
            "starting graceful shutdown drain"
        );

        self.state.send_replace(ShutdownState::Draining);
    }

    /// Wait until the inbox has nothing in flight or the drain period ends.
    ///
    /// Returns false when the deadline was hit with work outstanding.
    pub async fn drain(&self, inbox: &Inbox) -> bool {
        let deadline = Instant::now() + self.drain_period;

        loop {
            let in_flight = inbox.in_flight();
            if in_flight == 0 {
                info!("all in-flight envelopes drained");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(in_flight, "drain timeout reached, forcing shutdown");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Complete shutdown
    pub fn terminate(&self) {
        if self.state() == ShutdownState::Terminated {
            return;
        }

        info!("shutdown complete");
        self.state.send_replace(ShutdownState::Terminated);
        let _ = self.complete_tx.send(());
    }

    /// Check if accepting new work
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }
}
