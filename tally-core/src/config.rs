//! Configuration types
//!
//! All tunables of the store are passed in as plain configuration values;
//! nothing below is hardcoded at the call sites.

use crate::error::ConfigError;
use std::time::Duration;

const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

const DEFAULT_BACKUP_STARTUP_GRACE_SECS: u64 = 10;
const DEFAULT_BACKUP_INTERVAL_SECS: u64 = 60;
const DEFAULT_BACKUP_MAX_SNAPSHOTS: usize = 5;
const DEFAULT_BACKUP_RESTORE_ATTEMPTS: u32 = 3;
const DEFAULT_BACKUP_RESTORE_DELAY_MS: u64 = 100;

/// Retry policy configuration for transiently locked store files.
///
/// Backoff is linear: attempt `k` waits `k * base_delay` before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default: 5).
    pub max_attempts: u32,
    /// Base delay unit for the linear backoff (default: 50ms).
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum attempt count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                value: self.max_attempts.to_string(),
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Configuration for the integrity & recovery background service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Delay before the first tick, so the task never races the store's own
    /// startup file creation (default: 10 seconds).
    pub startup_grace: Duration,

    /// How often to snapshot and validate the store file (default: 60 seconds).
    pub interval: Duration,

    /// Maximum retained snapshots; older ones are pruned (default: 5).
    pub max_snapshots: usize,

    /// Bounded attempts for a recovery copy that races a live writer
    /// (default: 3).
    pub restore_attempts: u32,

    /// Delay between recovery copy attempts (default: 100ms).
    pub restore_delay: Duration,

    /// Name of the snapshot subdirectory alongside the store file
    /// (default: "snapshots").
    pub snapshot_dir: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(DEFAULT_BACKUP_STARTUP_GRACE_SECS),
            interval: Duration::from_secs(DEFAULT_BACKUP_INTERVAL_SECS),
            max_snapshots: DEFAULT_BACKUP_MAX_SNAPSHOTS,
            restore_attempts: DEFAULT_BACKUP_RESTORE_ATTEMPTS,
            restore_delay: Duration::from_millis(DEFAULT_BACKUP_RESTORE_DELAY_MS),
            snapshot_dir: "snapshots".to_string(),
        }
    }
}

impl BackupConfig {
    /// Create BackupConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TALLY_BACKUP_STARTUP_GRACE_SECS`: delay before the first tick (default: 10)
    /// - `TALLY_BACKUP_INTERVAL_SECS`: snapshot/validate interval (default: 60)
    /// - `TALLY_BACKUP_MAX_SNAPSHOTS`: retained snapshot count (default: 5)
    /// - `TALLY_BACKUP_RESTORE_ATTEMPTS`: bounded recovery copy attempts (default: 3)
    /// - `TALLY_BACKUP_RESTORE_DELAY_MS`: delay between recovery attempts (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let startup_grace = Duration::from_secs(
            std::env::var("TALLY_BACKUP_STARTUP_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKUP_STARTUP_GRACE_SECS),
        );

        let interval = Duration::from_secs(
            std::env::var("TALLY_BACKUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKUP_INTERVAL_SECS),
        );

        let max_snapshots = std::env::var("TALLY_BACKUP_MAX_SNAPSHOTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BACKUP_MAX_SNAPSHOTS);

        let restore_attempts = std::env::var("TALLY_BACKUP_RESTORE_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BACKUP_RESTORE_ATTEMPTS);

        let restore_delay = Duration::from_millis(
            std::env::var("TALLY_BACKUP_RESTORE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKUP_RESTORE_DELAY_MS),
        );

        Self {
            startup_grace,
            interval,
            max_snapshots,
            restore_attempts,
            restore_delay,
            snapshot_dir: defaults.snapshot_dir,
        }
    }

    /// Create a configuration for development/testing with short timings.
    pub fn development() -> Self {
        Self {
            startup_grace: Duration::from_millis(50),
            interval: Duration::from_millis(200),
            max_snapshots: 3,
            restore_attempts: 5,
            restore_delay: Duration::from_millis(20),
            snapshot_dir: "snapshots".to_string(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_snapshots == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_snapshots",
                value: self.max_snapshots.to_string(),
                reason: "must retain at least 1 snapshot",
            });
        }
        if self.restore_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "restore_attempts",
                value: self.restore_attempts.to_string(),
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Cache TTLs per query shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtlConfig {
    /// TTL for single-record entries (default: 60 seconds).
    pub record_ttl: Duration,
    /// TTL for list-query entries (default: 30 seconds).
    pub list_ttl: Duration,
    /// TTL for id-set comparison entries (default: 30 seconds).
    pub comparison_ttl: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            record_ttl: Duration::from_secs(60),
            list_ttl: Duration::from_secs(30),
            comparison_ttl: Duration::from_secs(30),
        }
    }
}

impl CacheTtlConfig {
    /// Create a TTL config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the single-record TTL.
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Set the list-query TTL.
    pub fn with_list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = ttl;
        self
    }

    /// Set the comparison TTL.
    pub fn with_comparison_ttl(mut self, ttl: Duration) -> Self {
        self.comparison_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, DEFAULT_RETRY_MAX_ATTEMPTS);
        assert_eq!(
            config.base_delay,
            Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(10));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_retry_config_rejects_zero_attempts() {
        let config = RetryConfig::new().with_max_attempts(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_config_default() {
        let config = BackupConfig::default();
        assert_eq!(
            config.interval,
            Duration::from_secs(DEFAULT_BACKUP_INTERVAL_SECS)
        );
        assert_eq!(config.max_snapshots, DEFAULT_BACKUP_MAX_SNAPSHOTS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backup_config_development() {
        let config = BackupConfig::development();
        assert!(config.interval < Duration::from_secs(1));
        assert_eq!(config.max_snapshots, 3);
    }

    #[test]
    fn test_backup_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = BackupConfig::from_env();
        assert_eq!(
            config.startup_grace,
            Duration::from_secs(DEFAULT_BACKUP_STARTUP_GRACE_SECS)
        );
        assert_eq!(config.restore_attempts, DEFAULT_BACKUP_RESTORE_ATTEMPTS);
    }

    #[test]
    fn test_backup_config_rejects_zero_snapshots() {
        let config = BackupConfig {
            max_snapshots: 0,
            ..BackupConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_ttl_builder() {
        let config = CacheTtlConfig::new()
            .with_record_ttl(Duration::from_secs(120))
            .with_list_ttl(Duration::from_secs(15))
            .with_comparison_ttl(Duration::from_secs(5));
        assert_eq!(config.record_ttl, Duration::from_secs(120));
        assert_eq!(config.list_ttl, Duration::from_secs(15));
        assert_eq!(config.comparison_ttl, Duration::from_secs(5));
    }
}
