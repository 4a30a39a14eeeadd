use tracing::info;

use super::DurableTimer;
use crate::store::{SharedStorage, StoreError};

/// Re-register the timer of every armed schedule at its `current_fire_at_utc`.
///
/// Paused and terminal schedules are skipped. Fire times already past fire
/// immediately. Returns the number of timers registered.
pub fn recover(storage: &SharedStorage, timer: &dyn DurableTimer) -> Result<usize, StoreError> {
    let armed = storage.armed_schedules()?;

    for schedule in &armed {
        timer.register(schedule.schedule_id, schedule.current_fire_at_utc);
    }

    info!(timers = armed.len(), backend = timer.name(), "timers recovered");
    Ok(armed.len())
}
