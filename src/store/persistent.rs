//! Persistent storage using fjall (pure Rust LSM-tree).
//!
//! Durable storage for production use. All data survives restarts.
//! Records are stored as JSON `Versioned<T>` values, keyed by
//! `batch_<uuid>` in the `batches` partition and `sched_<uuid>` in the
//! `schedules` partition.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::coordinator::Batch;
use crate::messages::{BatchId, ScheduleId};
use crate::schedule::ScheduledMessage;

use super::types::next_version;
use super::{Storage, StoreError, Versioned};

// =============================================================================
// PersistentStorage
// =============================================================================

/// Persistent storage using fjall LSM-tree.
///
/// Reads go straight to the partitions. Saves hold `write_lock` across the
/// version read and the insert so the compare-and-swap is atomic.
pub struct PersistentStorage {
    keyspace: Keyspace,
    batches: PartitionHandle,
    schedules: PartitionHandle,
    write_lock: Mutex<()>,
}

impl PersistentStorage {
    /// Open or create persistent storage at the given path.
    pub async fn open(path: &Path) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(path)?;

        let keyspace = Config::new(path).open()?;

        let batches = keyspace.open_partition("batches", PartitionCreateOptions::default())?;
        let schedules = keyspace.open_partition("schedules", PartitionCreateOptions::default())?;

        let store = Arc::new(Self {
            keyspace,
            batches,
            schedules,
            write_lock: Mutex::new(()),
        });

        tracing::info!(
            path = %path.display(),
            batches = store.batches.len().unwrap_or(0),
            schedules = store.schedules.len().unwrap_or(0),
            "persistent storage opened"
        );

        Ok(store)
    }

    fn load<T: DeserializeOwned>(
        partition: &PartitionHandle,
        key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        match partition.get(key.as_bytes())? {
            Some(value) => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn save<T: Serialize + DeserializeOwned>(
        &self,
        partition: &PartitionHandle,
        key: &str,
        record: &T,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let found = Self::load::<T>(partition, key)?.map(|v| v.version);
        let version = next_version(key, expected, found)?;

        let value = serde_json::to_vec(&Versioned::new(version, record)).map_err(|source| {
            StoreError::Encode {
                key: key.to_string(),
                source,
            }
        })?;
        partition.insert(key.as_bytes(), &value)?;

        Ok(version)
    }

    fn scan<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();
        for item in partition.iter() {
            let (key, value) = item?;
            let record: Versioned<T> =
                serde_json::from_slice(&value).map_err(|source| StoreError::Corrupt {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    source,
                })?;
            records.push(record.record);
        }
        Ok(records)
    }
}

impl Storage for PersistentStorage {
    fn load_batch(&self, id: BatchId) -> Result<Option<Versioned<Batch>>, StoreError> {
        Self::load(&self.batches, &id.key())
    }

    fn save_batch(&self, batch: &Batch, expected: Option<u64>) -> Result<u64, StoreError> {
        self.save(&self.batches, &batch.batch_id.key(), batch, expected)
    }

    fn batches(&self) -> Result<Vec<Batch>, StoreError> {
        Self::scan(&self.batches)
    }

    fn load_schedule(
        &self,
        id: ScheduleId,
    ) -> Result<Option<Versioned<ScheduledMessage>>, StoreError> {
        Self::load(&self.schedules, &id.key())
    }

    fn save_schedule(
        &self,
        schedule: &ScheduledMessage,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.save(
            &self.schedules,
            &schedule.schedule_id.key(),
            schedule,
            expected,
        )
    }

    fn schedules(&self) -> Result<Vec<ScheduledMessage>, StoreError> {
        Self::scan(&self.schedules)
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
