use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::DurableTimer;
use crate::messages::{Envelope, ScheduleId, TimerFired};
use crate::router::Inbox;
use crate::telemetry::counters;

struct Registration {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: AbortHandle,
}

/// Timer service backed by one tokio sleep task per registration.
pub struct TokioTimerService {
    inbox: Inbox,
    pending: Arc<Mutex<HashMap<ScheduleId, Registration>>>,
    generation: AtomicU64,
}

impl TokioTimerService {
    pub fn new(inbox: Inbox) -> Arc<Self> {
        Arc::new(Self {
            inbox,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        })
    }

    /// Fire time of the pending registration for `schedule_id`.
    pub fn pending_fire_at(&self, schedule_id: ScheduleId) -> Option<DateTime<Utc>> {
        self.lock().get(&schedule_id).map(|r| r.fire_at)
    }

    /// Abort every pending registration.
    pub fn shutdown(&self) {
        let mut pending = self.lock();
        for (_, registration) in pending.drain() {
            registration.handle.abort();
        }
        counters::timers_pending(0);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ScheduleId, Registration>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DurableTimer for TokioTimerService {
    fn register(&self, schedule_id: ScheduleId, fire_at: DateTime<Utc>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();

        let inbox = self.inbox.clone();
        let pending = self.pending.clone();

        // Hold the lock across spawn so the task cannot remove its entry
        // before it is inserted.
        let mut map = self.lock();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
                if map.get(&schedule_id).map(|r| r.generation) == Some(generation) {
                    map.remove(&schedule_id);
                }
                counters::timers_pending(map.len());
            }

            trace!(schedule_id = %schedule_id, fire_at = %fire_at, "timer fired");

            let fired = Envelope::TimerFired(TimerFired {
                schedule_id,
                fire_at_utc: fire_at,
            });
            if let Err(e) = inbox.send(fired).await {
                warn!(schedule_id = %schedule_id, error = %e, "timer fire not delivered");
            }
        });

        let replaced = map.insert(
            schedule_id,
            Registration {
                generation,
                fire_at,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = replaced {
            previous.handle.abort();
            debug!(
                schedule_id = %schedule_id,
                previous = %previous.fire_at,
                fire_at = %fire_at,
                "timer re-registered"
            );
        } else {
            debug!(schedule_id = %schedule_id, fire_at = %fire_at, delay_ms = delay.as_millis() as u64, "timer registered");
        }
        counters::timers_pending(map.len());
    }

    fn cancel(&self, schedule_id: ScheduleId) -> bool {
        let mut map = self.lock();
        let removed = map.remove(&schedule_id);
        counters::timers_pending(map.len());
        match removed {
            Some(registration) => {
                registration.handle.abort();
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.lock().len()
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

impl Drop for TokioTimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
