//! Shared vocabulary of the two durable state machines.
//!
//! Handlers on [`ScheduledMessage`](crate::schedule::ScheduledMessage) and
//! [`Batch`](crate::coordinator::Batch) never perform I/O. They return a
//! [`Transition`]: either the effects to run once the new state is persisted,
//! or the reason the input was dropped.

use chrono::{DateTime, Utc};

use crate::messages::{Envelope, ScheduleId, SendNow, TrackingEvent};

/// Side effect requested by a state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Publish a tracking event
    Track(TrackingEvent),
    /// Register (or replace) the wake-up for a scheduled message
    ArmTimer {
        schedule_id: ScheduleId,
        fire_at: DateTime<Utc>,
    },
    /// Hand a message to the transport
    Send(SendNow),
    /// Route a command to another durable instance
    Route(Envelope),
}

/// Why an input left the instance untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// Control request not newer than the last applied one
    StaleControl,
    /// Create for an instance that already exists
    DuplicateCreate,
    /// Confirmation for a message already resolved
    DuplicateConfirmation,
    /// Timer fired while paused
    Paused,
    /// Instance already finished
    Terminal,
    /// Timer fire from a replaced registration
    SupersededTimer,
    /// No such instance
    UnknownInstance,
}

impl Ignored {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaleControl => "stale_control",
            Self::DuplicateCreate => "duplicate_create",
            Self::DuplicateConfirmation => "duplicate_confirmation",
            Self::Paused => "paused",
            Self::Terminal => "terminal",
            Self::SupersededTimer => "superseded_timer",
            Self::UnknownInstance => "unknown_instance",
        }
    }
}

/// Outcome of feeding one input to a state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// State changed; run these effects after persisting it
    Applied(Vec<Effect>),
    /// Input dropped, state unchanged
    Ignored(Ignored),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Effects to run, empty when ignored.
    pub fn into_effects(self) -> Vec<Effect> {
        match self {
            Self::Applied(effects) => effects,
            Self::Ignored(_) => Vec::new(),
        }
    }
}
