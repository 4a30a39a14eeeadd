//! Wire messages: identifiers, inbound commands, tracking events.
//!
//! [`Envelope`] is what travels through the router. Its
//! [`correlation_id`](Envelope::correlation_id) names the durable instance
//! that must handle it.

mod commands;
mod events;
mod ids;

pub use commands::*;
pub use events::*;
pub use ids::*;

use serde::{Deserialize, Serialize};

/// Any inbound command, addressed to one durable instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Envelope {
    CreateBatch(CreateBatch),
    PauseBatch(PauseBatch),
    ResumeBatch(ResumeBatch),
    ScheduledMessageSent(ScheduledMessageSent),
    ScheduleMessage(ScheduleMessage),
    PauseSchedule(PauseSchedule),
    ResumeSchedule(ResumeSchedule),
    SendConfirmed(SendConfirmed),
    TimerFired(TimerFired),
}

impl Envelope {
    /// Instance this envelope is routed to.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::CreateBatch(m) => CorrelationId::Batch(m.batch_id),
            Self::PauseBatch(m) => CorrelationId::Batch(m.batch_id),
            Self::ResumeBatch(m) => CorrelationId::Batch(m.batch_id),
            Self::ScheduledMessageSent(m) => CorrelationId::Batch(m.batch_id),
            Self::ScheduleMessage(m) => CorrelationId::Schedule(m.schedule_id),
            Self::PauseSchedule(m) => CorrelationId::Schedule(m.schedule_id),
            Self::ResumeSchedule(m) => CorrelationId::Schedule(m.schedule_id),
            Self::SendConfirmed(m) => CorrelationId::Schedule(m.schedule_id),
            Self::TimerFired(m) => CorrelationId::Schedule(m.schedule_id),
        }
    }

    /// Message kind for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateBatch(_) => "create_batch",
            Self::PauseBatch(_) => "pause_batch",
            Self::ResumeBatch(_) => "resume_batch",
            Self::ScheduledMessageSent(_) => "scheduled_message_sent",
            Self::ScheduleMessage(_) => "schedule_message",
            Self::PauseSchedule(_) => "pause_schedule",
            Self::ResumeSchedule(_) => "resume_schedule",
            Self::SendConfirmed(_) => "send_confirmed",
            Self::TimerFired(_) => "timer_fired",
        }
    }
}
