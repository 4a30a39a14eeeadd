//! Stable identifiers used for correlation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Storage key for this identifier.
            pub fn key(&self) -> String {
                format!(concat!($prefix, "_{}"), self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a batch (one coordinator instance).
    BatchId,
    "batch"
);

uuid_id!(
    /// Identifier of one scheduled message (one scheduler instance).
    ScheduleId,
    "sched"
);

impl ScheduleId {
    /// Derive the schedule id of the `index`-th message of a batch.
    ///
    /// Deterministic, so a redelivered batch request fans out to the same ids.
    pub fn for_batch_message(batch_id: BatchId, index: usize) -> Self {
        let name = format!("message-{}", index);
        Self(Uuid::new_v5(batch_id.as_uuid(), name.as_bytes()))
    }
}

/// Address of the durable instance that must handle an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationId {
    Batch(BatchId),
    Schedule(ScheduleId),
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch(id) => write!(f, "batch:{}", id),
            Self::Schedule(id) => write!(f, "schedule:{}", id),
        }
    }
}
