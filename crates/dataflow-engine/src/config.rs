//! Engine configuration storage
//!
//! Tunables for calculation processes and the ingestion pipeline, persisted
//! as `engine.json` in a host-chosen directory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{EngineError, Result};

const CONFIG_FILE: &str = "engine.json";

/// Settings for calculation processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// How often a running process polls for a stop request
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval_ms: u64,
}

fn default_cancel_check_interval() -> u64 {
    1000
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            cancel_check_interval_ms: default_cancel_check_interval(),
        }
    }
}

impl CalculationConfig {
    pub fn cancel_check_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_check_interval_ms.max(1))
    }
}

/// Settings for the batched ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Records committed per bulk write at most
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Idle time after the last queued record before a partial batch is flushed
    #[serde(default = "default_max_batch_delay")]
    pub max_batch_delay_ms: u64,
    /// Parsed rows buffered between the CSV reader and the batcher
    #[serde(default = "default_record_channel_capacity")]
    pub record_channel_capacity: usize,
}

fn default_max_batch_size() -> usize {
    10_000
}

fn default_max_batch_delay() -> u64 {
    2_000
}

fn default_record_channel_capacity() -> usize {
    1_024
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_delay_ms: default_max_batch_delay(),
            record_channel_capacity: default_record_channel_capacity(),
        }
    }
}

impl IngestionConfig {
    pub fn max_batch_delay(&self) -> Duration {
        Duration::from_millis(self.max_batch_delay_ms)
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub calculation: CalculationConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

impl EngineConfig {
    /// Load configuration from disk, falling back to defaults when absent
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).await?;
        serde_json::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Save configuration to disk
    pub async fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;

        let path = dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents).await?;

        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.ingestion.max_batch_size, 10_000);
        assert_eq!(config.ingestion.max_batch_delay(), Duration::from_secs(2));
        assert_eq!(config.calculation.cancel_check_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.ingestion.max_batch_size = 50;
        config.calculation.cancel_check_interval_ms = 20;

        config.save(&dir.path().join("nested")).await.unwrap();
        let loaded = EngineConfig::load(&dir.path().join("nested")).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("engine.json"),
            r#"{ "ingestion": { "max_batch_size": 5 } }"#,
        )
        .await
        .unwrap();

        let config = EngineConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.ingestion.max_batch_size, 5);
        assert_eq!(config.ingestion.max_batch_delay_ms, 2_000);
        assert_eq!(config.calculation, CalculationConfig::default());
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("engine.json"), "{ nope")
            .await
            .unwrap();

        let err = EngineConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
