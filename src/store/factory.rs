//! Storage factory for creating storage backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{StorageBackend, StoreConfig};

use super::{MemoryStorage, PersistentStorage, SharedStorage};

/// Resolve the data directory.
fn resolve_data_dir(config_path: Option<&Path>) -> PathBuf {
    if let Some(path) = config_path {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        return std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path);
    }

    #[cfg(unix)]
    {
        if unsafe { libc::getuid() } == 0 {
            return PathBuf::from("/var/lib/trickled");
        }
    }

    dirs::data_dir()
        .map(|p| p.join("trickled"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".local/share/trickled"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        })
}

/// Create a storage backend based on configuration.
pub async fn create_storage(config: &StoreConfig) -> anyhow::Result<SharedStorage> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("using in-memory storage (volatile)");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::Fjall => {
            let data_dir = resolve_data_dir(config.path.as_deref());
            std::fs::create_dir_all(&data_dir)?;
            tracing::info!(path = %data_dir.display(), "using persistent storage");
            Ok(PersistentStorage::open(&data_dir).await? as SharedStorage)
        }
    }
}
