//! Batch coordinator.
//!
//! One [`Batch`] per trickle request. On create it computes the send times,
//! persists itself, and fans out one `ScheduleMessage` per message. It then
//! counts completion notices and moves to `Completed` exactly once, when every
//! scheduled message has been resolved.

mod batch;

pub use batch::{Batch, BatchMessage, BatchStatus, MessageStatus};

use crate::messages::{BatchId, ScheduleId};
use crate::timing::TimingError;

/// Coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("batch {0} has no messages")]
    EmptyBatch(BatchId),

    #[error("{operation} is not supported")]
    Unsupported { operation: &'static str },

    #[error("schedule {schedule_id} does not belong to batch {batch_id}")]
    UnknownSchedule {
        batch_id: BatchId,
        schedule_id: ScheduleId,
    },

    #[error("invariant violated on batch {batch_id}: {detail}")]
    InvariantViolation { batch_id: BatchId, detail: String },

    #[error(transparent)]
    Timing(#[from] TimingError),
}

impl CoordinatorError {
    /// Whether the batch state contradicts the message that arrived.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownSchedule { .. } | Self::InvariantViolation { .. }
        )
    }
}
