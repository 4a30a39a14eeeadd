//! Outbound tracking events.
//!
//! Every state change of a batch or scheduled message produces one of these.
//! They are published on the [`EventBus`](crate::tracking::EventBus) for the
//! reporting side to consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::commands::{MessageMetadata, TricklePolicy};
use super::ids::{BatchId, ScheduleId};

/// One entry of a freshly created batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    pub schedule_id: ScheduleId,
    pub target_address: String,
    pub scheduled_at_utc: DateTime<Utc>,
}

/// Tracking event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    /// Batch accepted and timing computed
    BatchCreated {
        batch_id: BatchId,
        policy: TricklePolicy,
        metadata: MessageMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confirmation_email: Option<String>,
        schedules: Vec<ScheduledEntry>,
        created_at_utc: DateTime<Utc>,
    },
    /// Scheduled message persisted and armed
    ScheduleCreated {
        schedule_id: ScheduleId,
        batch_id: BatchId,
        send_at_utc: DateTime<Utc>,
    },
    /// Acknowledgement of a create, addressed to the batch
    MessageScheduled {
        batch_id: BatchId,
        schedule_id: ScheduleId,
        send_at_utc: DateTime<Utc>,
    },
    SchedulePaused {
        schedule_id: ScheduleId,
        batch_id: BatchId,
        request_at_utc: DateTime<Utc>,
    },
    ScheduleResumed {
        schedule_id: ScheduleId,
        batch_id: BatchId,
        request_at_utc: DateTime<Utc>,
    },
    /// New fire time after a resume
    MessageRescheduled {
        schedule_id: ScheduleId,
        batch_id: BatchId,
        send_at_utc: DateTime<Utc>,
    },
    MessageConfirmed {
        schedule_id: ScheduleId,
        batch_id: BatchId,
        receipt: String,
        sent_at_utc: DateTime<Utc>,
        cost: i64,
    },
    MessageFailed {
        schedule_id: ScheduleId,
        batch_id: BatchId,
        reason: String,
        failed_at_utc: DateTime<Utc>,
    },
    BatchCompleted {
        batch_id: BatchId,
        delivered: usize,
        failed: usize,
        completed_at_utc: DateTime<Utc>,
    },
}

impl TrackingEvent {
    /// Event name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchCreated { .. } => "batch_created",
            Self::ScheduleCreated { .. } => "schedule_created",
            Self::MessageScheduled { .. } => "message_scheduled",
            Self::SchedulePaused { .. } => "schedule_paused",
            Self::ScheduleResumed { .. } => "schedule_resumed",
            Self::MessageRescheduled { .. } => "message_rescheduled",
            Self::MessageConfirmed { .. } => "message_confirmed",
            Self::MessageFailed { .. } => "message_failed",
            Self::BatchCompleted { .. } => "batch_completed",
        }
    }

    /// Batch the event belongs to.
    pub fn batch_id(&self) -> BatchId {
        match self {
            Self::BatchCreated { batch_id, .. }
            | Self::ScheduleCreated { batch_id, .. }
            | Self::MessageScheduled { batch_id, .. }
            | Self::SchedulePaused { batch_id, .. }
            | Self::ScheduleResumed { batch_id, .. }
            | Self::MessageRescheduled { batch_id, .. }
            | Self::MessageConfirmed { batch_id, .. }
            | Self::MessageFailed { batch_id, .. }
            | Self::BatchCompleted { batch_id, .. } => *batch_id,
        }
    }
}
