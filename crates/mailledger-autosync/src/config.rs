//! Auto-sync configuration.
//!
//! Stored as JSON next to the other MailLedger settings. Every field has a
//! default, so partial files are accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default download group size in bytes.
pub const DEFAULT_GROUP_SIZE: u64 = 50 * 1024;

/// Byte cap for a batch started outside idle time.
pub const DEFAULT_FIRST_GROUP_SIZE_LIMIT: u64 = 60 * 1024;

/// How folders on the same server share download bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadModel {
    /// At most one folder per server downloads at a time.
    #[default]
    Chained,
    /// Every folder may download at once.
    Parallel,
}

/// Tunables of the auto-sync scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSyncConfig {
    /// Byte budget of a download group.
    pub group_size: u64,
    /// Byte cap of a batch started while the user is active.
    pub first_group_size_limit: u64,
    /// Connection-sharing policy.
    pub download_model: DownloadModel,
    /// Period of the discovery/update timer.
    pub timer_interval_ms: u64,
    /// Headers examined per discovery tick.
    pub headers_per_discovery_pass: usize,
    /// Minimum time between discovery passes of a folder.
    pub discovery_interval_minutes: u32,
    /// Minimum time between updates of a folder when the account sets none.
    pub default_update_interval_minutes: u32,
    /// Inactivity before the user counts as idle.
    pub idle_threshold_secs: u64,
    /// Retries of the same group before moving on.
    pub group_retry_count: u32,
    /// Consecutive skipped groups before a folder is quarantined.
    pub quarantine_after_skipped_groups: u32,
}

impl Default for AutoSyncConfig {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            first_group_size_limit: DEFAULT_FIRST_GROUP_SIZE_LIMIT,
            download_model: DownloadModel::Chained,
            timer_interval_ms: 400,
            headers_per_discovery_pass: 250,
            discovery_interval_minutes: 60,
            default_update_interval_minutes: 10,
            idle_threshold_secs: 10,
            group_retry_count: 3,
            quarantine_after_skipped_groups: 3,
        }
    }
}

impl AutoSyncConfig {
    /// Default location: `<config dir>/mailledger/autosync.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailledger")
            .join("autosync.json")
    }

    /// Load the configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config.normalized())
    }

    /// Load the configuration from `path`, falling back to defaults if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            tracing::debug!(?path, "No auto-sync config, using defaults");
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Save the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;

        tracing::info!("Auto-sync config saved to {:?}", path);
        Ok(())
    }

    /// Replace out-of-range values with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.group_size == 0 {
            self.group_size = defaults.group_size;
        }
        if self.timer_interval_ms == 0 {
            self.timer_interval_ms = defaults.timer_interval_ms;
        }
        if self.headers_per_discovery_pass == 0 {
            self.headers_per_discovery_pass = defaults.headers_per_discovery_pass;
        }
        self
    }

    /// Timer period.
    #[must_use]
    pub const fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_interval_ms)
    }

    /// Idle threshold.
    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AutoSyncConfig::default();
        assert_eq!(config.group_size, 50 * 1024);
        assert_eq!(config.first_group_size_limit, 60 * 1024);
        assert_eq!(config.download_model, DownloadModel::Chained);
        assert_eq!(config.timer_interval(), Duration::from_millis(400));
        assert_eq!(config.headers_per_discovery_pass, 250);
        assert_eq!(config.group_retry_count, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AutoSyncConfig =
            serde_json::from_str(r#"{"download_model": "parallel", "group_size": 0}"#).unwrap();
        let config = config.normalized();

        assert_eq!(config.download_model, DownloadModel::Parallel);
        assert_eq!(config.group_size, DEFAULT_GROUP_SIZE);
        assert_eq!(config.discovery_interval_minutes, 60);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("autosync.json");

        let config = AutoSyncConfig {
            group_size: 128 * 1024,
            download_model: DownloadModel::Parallel,
            ..AutoSyncConfig::default()
        };
        config.save(&path).await.unwrap();

        let loaded = AutoSyncConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AutoSyncConfig::load_or_default(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(loaded, AutoSyncConfig::default());
    }
}
