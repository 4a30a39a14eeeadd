//! Record envelope and storage statistics.

use serde::{Deserialize, Serialize};

/// A stored record together with its optimistic-concurrency version.
///
/// Versions start at 1 on create and increase by one on every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, record: T) -> Self {
        Self { version, record }
    }

    /// Drop the version, keep the record.
    pub fn into_inner(self) -> T {
        self.record
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict on {key}: expected {expected:?}, found {found:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("corrupt record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Fjall(#[from] fjall::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Fjall(_))
    }
}

/// Storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub batches: usize,
    pub active_batches: usize,
    pub completed_batches: usize,
    pub schedules: usize,
    /// Non-terminal, unpaused schedules (a timer should exist)
    pub armed_schedules: usize,
    pub paused_schedules: usize,
    pub terminal_schedules: usize,
}

/// Check an expected version against the current one and return the next.
pub(crate) fn next_version(
    key: &str,
    expected: Option<u64>,
    found: Option<u64>,
) -> Result<u64, StoreError> {
    match (expected, found) {
        (None, None) => Ok(1),
        (Some(e), Some(f)) if e == f => Ok(f + 1),
        _ => Err(StoreError::Conflict {
            key: key.to_string(),
            expected,
            found,
        }),
    }
}
