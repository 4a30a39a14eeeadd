//! Durable state for batches and scheduled messages.
//!
//! One keyed record per [`Batch`] and one per [`ScheduledMessage`]. Every
//! save carries the version the caller loaded; a mismatch fails with
//! [`StoreError::Conflict`] and the caller re-runs its load-decide-save cycle.
//! Creating a record requires that none exists under its key.
//!
//! # Implementations
//!
//! - [`MemoryStorage`]: In-memory, volatile - for development/testing
//! - [`PersistentStorage`]: Fjall-backed, durable - for production

mod factory;
mod memory;
mod persistent;
mod types;

pub use factory::create_storage;
pub use memory::MemoryStorage;
pub use persistent::PersistentStorage;
pub use types::{StoreError, StoreStats, Versioned};

use std::sync::Arc;

use crate::coordinator::Batch;
use crate::messages::{BatchId, ScheduleId};
use crate::schedule::ScheduledMessage;

/// Storage for the two durable record kinds.
///
/// All implementations must be thread-safe (Send + Sync).
pub trait Storage: Send + Sync {
    // -------------------------------------------------------------------------
    // Batches
    // -------------------------------------------------------------------------

    /// Load a batch with its current version.
    fn load_batch(&self, id: BatchId) -> Result<Option<Versioned<Batch>>, StoreError>;

    /// Save a batch. `expected` is the loaded version, `None` to create.
    /// Returns the new version.
    fn save_batch(&self, batch: &Batch, expected: Option<u64>) -> Result<u64, StoreError>;

    /// All batches.
    fn batches(&self) -> Result<Vec<Batch>, StoreError>;

    // -------------------------------------------------------------------------
    // Scheduled messages
    // -------------------------------------------------------------------------

    /// Load a scheduled message with its current version.
    fn load_schedule(
        &self,
        id: ScheduleId,
    ) -> Result<Option<Versioned<ScheduledMessage>>, StoreError>;

    /// Save a scheduled message. `expected` is the loaded version, `None` to create.
    fn save_schedule(
        &self,
        schedule: &ScheduledMessage,
        expected: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// All scheduled messages.
    fn schedules(&self) -> Result<Vec<ScheduledMessage>, StoreError>;

    // -------------------------------------------------------------------------
    // Recovery & Maintenance
    // -------------------------------------------------------------------------

    /// Scheduled messages that should have a live timer registration.
    fn armed_schedules(&self) -> Result<Vec<ScheduledMessage>, StoreError> {
        Ok(self
            .schedules()?
            .into_iter()
            .filter(ScheduledMessage::is_armed)
            .collect())
    }

    /// Record counts.
    fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();

        for batch in self.batches()? {
            stats.batches += 1;
            if batch.is_completed() {
                stats.completed_batches += 1;
            } else {
                stats.active_batches += 1;
            }
        }

        for schedule in self.schedules()? {
            stats.schedules += 1;
            if schedule.terminal {
                stats.terminal_schedules += 1;
            } else if schedule.paused {
                stats.paused_schedules += 1;
            } else {
                stats.armed_schedules += 1;
            }
        }

        Ok(stats)
    }

    /// Flush pending writes to disk (no-op for in-memory).
    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;
