//! Outbound SMS transport.
//!
//! The scheduler hands a [`SendNow`] to the transport when its timer fires.
//! Accepting the send is all `send` reports; the delivery result comes back
//! later as a `SendConfirmed` envelope on the router inbox.

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;

use crate::messages::{ScheduleId, SendNow};

/// Transport errors raised when handing over a send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("send for {schedule_id} rejected: {reason}")]
    Rejected {
        schedule_id: ScheduleId,
        reason: String,
    },
}

impl TransportError {
    /// Whether retrying the hand-over may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// SMS transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a message for sending. Must return promptly.
    async fn send(&self, cmd: SendNow) -> Result<(), TransportError>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}
