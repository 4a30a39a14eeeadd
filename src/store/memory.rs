//! In-memory storage implementation.
//!
//! Volatile storage for development and testing. All data is lost on restart.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use crate::coordinator::Batch;
use crate::messages::{BatchId, ScheduleId};
use crate::schedule::ScheduledMessage;

use super::types::next_version;
use super::{Storage, StoreError, Versioned};

/// In-memory storage implementation.
///
/// Thread-safe using RwLock. Compare-and-swap happens under the write lock.
#[derive(Default)]
pub struct MemoryStorage {
    batches: RwLock<HashMap<BatchId, Versioned<Batch>>>,
    schedules: RwLock<HashMap<ScheduleId, Versioned<ScheduledMessage>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn load<K: Eq + Hash, T: Clone>(
    map: &RwLock<HashMap<K, Versioned<T>>>,
    key: &K,
) -> Option<Versioned<T>> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
}

fn save<K: Eq + Hash, T: Clone>(
    map: &RwLock<HashMap<K, Versioned<T>>>,
    key: K,
    name: String,
    record: &T,
    expected: Option<u64>,
) -> Result<u64, StoreError> {
    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    let version = next_version(&name, expected, map.get(&key).map(|v| v.version))?;
    map.insert(key, Versioned::new(version, record.clone()));
    Ok(version)
}

fn all<K, T: Clone>(map: &RwLock<HashMap<K, Versioned<T>>>) -> Vec<T> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .map(|v| v.record.clone())
        .collect()
}

impl Storage for MemoryStorage {
    fn load_batch(&self, id: BatchId) -> Result<Option<Versioned<Batch>>, StoreError> {
        Ok(load(&self.batches, &id))
    }

    fn save_batch(&self, batch: &Batch, expected: Option<u64>) -> Result<u64, StoreError> {
        save(
            &self.batches,
            batch.batch_id,
            batch.batch_id.key(),
            batch,
            expected,
        )
    }

    fn batches(&self) -> Result<Vec<Batch>, StoreError> {
        Ok(all(&self.batches))
    }

    fn load_schedule(
        &self,
        id: ScheduleId,
    ) -> Result<Option<Versioned<ScheduledMessage>>, StoreError> {
        Ok(load(&self.schedules, &id))
    }

    fn save_schedule(
        &self,
        schedule: &ScheduledMessage,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        save(
            &self.schedules,
            schedule.schedule_id,
            schedule.schedule_id.key(),
            schedule,
            expected,
        )
    }

    fn schedules(&self) -> Result<Vec<ScheduledMessage>, StoreError> {
        Ok(all(&self.schedules))
    }
}
