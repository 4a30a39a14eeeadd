//! Inbound commands and the transport command emitted on timer fire.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BatchId, ScheduleId};

/// Descriptive metadata carried from the intake request onto every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One message of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingSms {
    /// Destination mobile number
    pub target_address: String,
    /// Message text
    pub body: String,
}

impl OutgoingSms {
    pub fn new(target_address: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            target_address: target_address.into(),
            body: body.into(),
        }
    }
}

/// What a scheduled message will hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsPayload {
    pub target_address: String,
    pub body: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// How a batch is spread over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TricklePolicy {
    /// Spread evenly so the first message goes at start and the last at start + duration.
    SpreadOverWindow {
        #[serde(rename = "duration_ms", with = "duration_ms")]
        duration: TimeDelta,
    },
    /// Fixed gap between consecutive messages.
    FixedSpacing {
        #[serde(rename = "spacing_ms", with = "duration_ms")]
        spacing: TimeDelta,
    },
}

impl TricklePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpreadOverWindow { .. } => "spread_over_window",
            Self::FixedSpacing { .. } => "fixed_spacing",
        }
    }
}

/// Start a batch: compute timing and fan out one scheduler per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBatch {
    pub batch_id: BatchId,
    pub messages: Vec<OutgoingSms>,
    pub policy: TricklePolicy,
    pub start_at_utc: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_email: Option<String>,
}

/// Batch-wide pause. Part of the contract, rejected by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseBatch {
    pub batch_id: BatchId,
    pub request_at_utc: DateTime<Utc>,
}

/// Batch-wide resume. Part of the contract, rejected by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeBatch {
    pub batch_id: BatchId,
    pub request_at_utc: DateTime<Utc>,
}

/// Create one scheduled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMessage {
    pub schedule_id: ScheduleId,
    pub batch_id: BatchId,
    pub payload: SmsPayload,
    pub send_at_utc: DateTime<Utc>,
}

/// Suspend a scheduled message indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseSchedule {
    pub schedule_id: ScheduleId,
    pub request_at_utc: DateTime<Utc>,
}

/// Resume a paused message at `original send time + offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeSchedule {
    pub schedule_id: ScheduleId,
    #[serde(rename = "offset_ms", with = "duration_ms")]
    pub offset: TimeDelta,
    pub request_at_utc: DateTime<Utc>,
}

/// Result the transport reports for one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered {
        receipt: String,
        sent_at_utc: DateTime<Utc>,
        /// Price in the smallest currency unit
        cost: i64,
    },
    Failed {
        reason: String,
        failed_at_utc: DateTime<Utc>,
    },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Transport confirmation for one scheduled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendConfirmed {
    pub schedule_id: ScheduleId,
    pub outcome: SendOutcome,
}

/// Wake-up delivered by the timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFired {
    pub schedule_id: ScheduleId,
    pub fire_at_utc: DateTime<Utc>,
}

/// Completion notice a scheduler sends to its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMessageSent {
    pub batch_id: BatchId,
    pub schedule_id: ScheduleId,
    pub outcome: SendOutcome,
}

/// Command to the transport: send this message now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendNow {
    pub schedule_id: ScheduleId,
    pub payload: SmsPayload,
}

/// Serde adapter for signed millisecond durations.
pub(crate) mod duration_ms {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TimeDelta, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = i64::deserialize(deserializer)?;
        TimeDelta::try_milliseconds(ms)
            .ok_or_else(|| serde::de::Error::custom(format!("duration out of range: {}ms", ms)))
    }
}
