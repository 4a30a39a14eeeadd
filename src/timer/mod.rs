//! Durable timer service.
//!
//! A registration is a wake-up at an absolute UTC time for one scheduled
//! message. Re-registering the same id replaces the pending wake-up. When a
//! timer fires it delivers `TimerFired { schedule_id, fire_at_utc }` to the
//! router.
//!
//! Durability does not come from the timer itself: the authoritative fire time
//! is the persisted `current_fire_at_utc`, and [`recover`] re-registers every
//! armed schedule at startup. Firing is at-least-once; the scheduler drops
//! fires that no longer match its state.

mod recovery;
mod tokio_timer;

pub use recovery::recover;
pub use tokio_timer::TokioTimerService;

use chrono::{DateTime, Utc};

use crate::messages::ScheduleId;

/// Timer registration backend.
pub trait DurableTimer: Send + Sync {
    /// Register a wake-up for `schedule_id` at `fire_at`, replacing any pending
    /// one. A time in the past fires immediately.
    fn register(&self, schedule_id: ScheduleId, fire_at: DateTime<Utc>);

    /// Drop the pending wake-up for `schedule_id`, if any.
    fn cancel(&self, schedule_id: ScheduleId) -> bool;

    /// Number of registrations not yet fired.
    fn pending(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}
