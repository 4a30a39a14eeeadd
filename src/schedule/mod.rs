//! Message scheduler.
//!
//! One [`ScheduledMessage`] per message of a batch. It waits for its timer,
//! hands the payload to the transport when the timer fires, and reports the
//! transport's confirmation back to its batch.
//!
//! ```text
//!   Scheduled ──pause──► Paused ──resume──► Scheduled ──confirm──► Sent | Failed
//! ```
//!
//! Pause and resume are last-writer-wins on `request_at_utc`. A timer fire is
//! only honoured when it matches `current_fire_at_utc`, so a fire from a
//! registration that a resume replaced is dropped.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::machine::{Effect, Ignored, Transition};
use crate::messages::{
    BatchId, Envelope, PauseSchedule, ResumeSchedule, ScheduleId, ScheduleMessage,
    ScheduledMessageSent, SendNow, SendOutcome, SmsPayload, TimerFired, TrackingEvent,
};

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("resume offset {offset} puts schedule {schedule_id} out of range")]
    OffsetOutOfRange {
        schedule_id: ScheduleId,
        offset: TimeDelta,
    },
}

/// Derived status of a scheduled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Waiting for its timer
    Scheduled,
    /// Suspended until resumed
    Paused,
    /// Transport confirmed delivery
    Sent,
    /// Transport reported failure
    Failed,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Paused => "paused",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Durable state of one scheduled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub schedule_id: ScheduleId,
    /// Owning batch, used only to address the completion notice
    pub batch_id: BatchId,
    pub payload: SmsPayload,
    /// Send time computed by the batch
    pub original_scheduled_at_utc: DateTime<Utc>,
    /// Time the timer is currently registered for
    pub current_fire_at_utc: DateTime<Utc>,
    pub paused: bool,
    /// Request time of the last applied pause or resume
    pub last_control_request_at_utc: Option<DateTime<Utc>>,
    pub terminal: bool,
    pub created_at_utc: DateTime<Utc>,
    /// When the payload was last handed to the transport
    #[serde(default)]
    pub dispatched_at_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<SendOutcome>,
}

impl ScheduledMessage {
    /// Build a new instance from its create command.
    ///
    /// Existence is checked by the caller; a second create for the same id
    /// must not reach this.
    pub fn create(cmd: &ScheduleMessage, now: DateTime<Utc>) -> (Self, Vec<Effect>) {
        let msg = Self {
            schedule_id: cmd.schedule_id,
            batch_id: cmd.batch_id,
            payload: cmd.payload.clone(),
            original_scheduled_at_utc: cmd.send_at_utc,
            current_fire_at_utc: cmd.send_at_utc,
            paused: false,
            last_control_request_at_utc: None,
            terminal: false,
            created_at_utc: now,
            dispatched_at_utc: None,
            completed_at_utc: None,
            outcome: None,
        };

        let effects = vec![
            Effect::ArmTimer {
                schedule_id: msg.schedule_id,
                fire_at: msg.current_fire_at_utc,
            },
            Effect::Track(TrackingEvent::ScheduleCreated {
                schedule_id: msg.schedule_id,
                batch_id: msg.batch_id,
                send_at_utc: msg.current_fire_at_utc,
            }),
            Effect::Track(TrackingEvent::MessageScheduled {
                batch_id: msg.batch_id,
                schedule_id: msg.schedule_id,
                send_at_utc: msg.current_fire_at_utc,
            }),
        ];

        (msg, effects)
    }

    pub fn status(&self) -> ScheduleStatus {
        match (&self.outcome, self.terminal, self.paused) {
            (Some(SendOutcome::Failed { .. }), true, _) => ScheduleStatus::Failed,
            (_, true, _) => ScheduleStatus::Sent,
            (_, false, true) => ScheduleStatus::Paused,
            (_, false, false) => ScheduleStatus::Scheduled,
        }
    }

    /// Whether a timer registration should exist for this instance.
    pub fn is_armed(&self) -> bool {
        !self.terminal && !self.paused
    }

    /// Timer fired: send now unless paused or superseded.
    pub fn on_timer_fired(&mut self, fire: &TimerFired, now: DateTime<Utc>) -> Transition {
        if self.terminal {
            return Transition::Ignored(Ignored::Terminal);
        }
        if self.paused {
            debug!(schedule_id = %self.schedule_id, "timer fired while paused, dropping");
            return Transition::Ignored(Ignored::Paused);
        }
        if fire.fire_at_utc != self.current_fire_at_utc {
            debug!(
                schedule_id = %self.schedule_id,
                fired_for = %fire.fire_at_utc,
                current = %self.current_fire_at_utc,
                "superseded timer fire"
            );
            return Transition::Ignored(Ignored::SupersededTimer);
        }

        self.dispatched_at_utc = Some(now);

        Transition::Applied(vec![Effect::Send(SendNow {
            schedule_id: self.schedule_id,
            payload: self.payload.clone(),
        })])
    }

    /// Suspend. Applies only when the request is strictly newer than the last
    /// applied control request.
    pub fn pause(&mut self, cmd: &PauseSchedule) -> Transition {
        if self.terminal {
            return Transition::Ignored(Ignored::Terminal);
        }
        if let Some(last) = self.last_control_request_at_utc {
            if cmd.request_at_utc <= last {
                return Transition::Ignored(Ignored::StaleControl);
            }
        }

        self.paused = true;
        self.last_control_request_at_utc = Some(cmd.request_at_utc);

        Transition::Applied(vec![Effect::Track(TrackingEvent::SchedulePaused {
            schedule_id: self.schedule_id,
            batch_id: self.batch_id,
            request_at_utc: cmd.request_at_utc,
        })])
    }

    /// Resume at `original_scheduled_at_utc + offset`. Applies only when the
    /// last applied control request is strictly older than this one. The
    /// timer is re-registered even when the new time is already past.
    pub fn resume(&mut self, cmd: &ResumeSchedule) -> Result<Transition, SchedulerError> {
        if self.terminal {
            return Ok(Transition::Ignored(Ignored::Terminal));
        }
        if let Some(last) = self.last_control_request_at_utc {
            if !(last < cmd.request_at_utc) {
                return Ok(Transition::Ignored(Ignored::StaleControl));
            }
        }

        let fire_at = self
            .original_scheduled_at_utc
            .checked_add_signed(cmd.offset)
            .ok_or(SchedulerError::OffsetOutOfRange {
                schedule_id: self.schedule_id,
                offset: cmd.offset,
            })?;

        self.paused = false;
        self.current_fire_at_utc = fire_at;
        self.last_control_request_at_utc = Some(cmd.request_at_utc);

        Ok(Transition::Applied(vec![
            Effect::ArmTimer {
                schedule_id: self.schedule_id,
                fire_at,
            },
            Effect::Track(TrackingEvent::ScheduleResumed {
                schedule_id: self.schedule_id,
                batch_id: self.batch_id,
                request_at_utc: cmd.request_at_utc,
            }),
            Effect::Track(TrackingEvent::MessageRescheduled {
                schedule_id: self.schedule_id,
                batch_id: self.batch_id,
                send_at_utc: fire_at,
            }),
        ]))
    }

    /// Transport confirmation. Terminal either way; the batch is told.
    pub fn confirm(&mut self, outcome: &SendOutcome, now: DateTime<Utc>) -> Transition {
        if self.terminal {
            return Transition::Ignored(Ignored::DuplicateConfirmation);
        }

        self.terminal = true;
        self.completed_at_utc = Some(now);
        self.outcome = Some(outcome.clone());

        let tracked = match outcome {
            SendOutcome::Delivered {
                receipt,
                sent_at_utc,
                cost,
            } => TrackingEvent::MessageConfirmed {
                schedule_id: self.schedule_id,
                batch_id: self.batch_id,
                receipt: receipt.clone(),
                sent_at_utc: *sent_at_utc,
                cost: *cost,
            },
            SendOutcome::Failed {
                reason,
                failed_at_utc,
            } => TrackingEvent::MessageFailed {
                schedule_id: self.schedule_id,
                batch_id: self.batch_id,
                reason: reason.clone(),
                failed_at_utc: *failed_at_utc,
            },
        };

        Transition::Applied(vec![
            Effect::Route(Envelope::ScheduledMessageSent(ScheduledMessageSent {
                batch_id: self.batch_id,
                schedule_id: self.schedule_id,
                outcome: outcome.clone(),
            })),
            Effect::Track(tracked),
        ])
    }
}
