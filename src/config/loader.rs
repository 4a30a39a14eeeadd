use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::{Config, StorageBackend};

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // serde_yaml rejects an empty document, treat it as all defaults
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.router.shards == 0 {
            anyhow::bail!("router.shards must be at least 1");
        }

        if self.router.mailbox_capacity == 0 {
            anyhow::bail!("router.mailbox_capacity must be at least 1");
        }

        if self.router.redelivery_base_delay > self.router.redelivery_max_delay {
            anyhow::bail!(
                "router.redelivery_base_delay ({:?}) exceeds router.redelivery_max_delay ({:?})",
                self.router.redelivery_base_delay,
                self.router.redelivery_max_delay
            );
        }

        let failure_rate = self.transport.mock.failure_rate;
        if !(0.0..=1.0).contains(&failure_rate) {
            anyhow::bail!(
                "transport.mock.failure_rate must be within [0, 1], got {}",
                failure_rate
            );
        }

        if self.transport.mock.cost < 0 {
            anyhow::bail!("transport.mock.cost must not be negative");
        }

        let sample_rate = self.telemetry.trace_sample_rate;
        if !(0.0..=1.0).contains(&sample_rate) {
            anyhow::bail!(
                "telemetry.trace_sample_rate must be within [0, 1], got {}",
                sample_rate
            );
        }

        if self.store.backend == StorageBackend::Fjall {
            if let Some(path) = &self.store.path {
                if path.is_file() {
                    anyhow::bail!("store.path is a file: {}", path.display());
                }
            }
        }

        info!("configuration validated successfully");
        Ok(())
    }
}
