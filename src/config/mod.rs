//! Configuration management for rollsync
//!
//! Explicit configuration objects, loaded from a TOML file and passed
//! into constructors; there is no process-wide singleton. Durations are
//! written as plain integers (seconds, or milliseconds where noted) to
//! keep the file format obvious.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compose;
use crate::error::{ComposeError, ConfigError};
use crate::health::{CheckKind, HealthCheckConfig};
use crate::notify::NotifyEvents;
use crate::strategy::{StrategyConfig, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compose: ComposeSettings,
    pub engine: EngineSettings,
    pub backup: BackupSettings,
    pub strategy: StrategySettings,
    pub health: HealthSettings,
    pub notifications: NotificationSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    /// Explicit compose file path. When unset the standard names are
    /// probed in the working directory.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Engine binary to drive.
    pub binary: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Snapshot directory; defaults to the platform data directory.
    pub directory: Option<PathBuf>,
    /// Snapshots kept per service.
    pub max_history: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: None,
            max_history: 10,
        }
    }
}

impl BackupSettings {
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("rollsync").join("backups"))
                .unwrap_or_else(|| PathBuf::from("./backups"))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub kind: StrategyKind,
    pub percentage: Option<u32>,
    pub delay_between_updates_secs: u64,
    pub timeout_secs: u64,
    pub rollback_on_failure: bool,
    pub verification_period_secs: Option<u64>,
    pub progression_steps: u32,
    pub step_wait_secs: u64,
    pub pre_command: Option<String>,
    pub post_command: Option<String>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            kind: StrategyKind::OneAtATime,
            percentage: None,
            delay_between_updates_secs: 0,
            timeout_secs: 600,
            rollback_on_failure: true,
            verification_period_secs: None,
            progression_steps: 4,
            step_wait_secs: 120,
            pre_command: None,
            post_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub kind: CheckKind,
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub command: Option<String>,
    pub timeout_secs: u64,
    pub retry_interval_ms: u64,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            kind: CheckKind::Container,
            endpoint: None,
            port: None,
            command: None,
            timeout_secs: 5,
            retry_interval_ms: 1000,
            success_threshold: 1,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// JSON webhook target; log-only notifications when unset.
    pub webhook_url: Option<String>,
    pub on_start: bool,
    pub on_success: bool,
    pub on_failure: bool,
    pub on_rollback: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            on_start: false,
            on_success: true,
            on_failure: true,
            on_rollback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compose: ComposeSettings::default(),
            engine: EngineSettings::default(),
            backup: BackupSettings::default(),
            strategy: StrategySettings::default(),
            health: HealthSettings::default(),
            notifications: NotificationSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(ConfigError::FileNotFound(_)) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load config file, using defaults");
                Self::default()
            }
        }
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }

    /// Enforce the documented strategy and health bounds up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy_config()
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))
    }

    pub fn health_check(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            kind: self.health.kind,
            endpoint: self.health.endpoint.clone(),
            port: self.health.port,
            command: self.health.command.clone(),
            timeout: Duration::from_secs(self.health.timeout_secs),
            retry_interval: Duration::from_millis(self.health.retry_interval_ms),
            success_threshold: self.health.success_threshold,
            failure_threshold: self.health.failure_threshold,
        }
    }

    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            kind: self.strategy.kind,
            health_check: self.health_check(),
            delay_between_updates: Duration::from_secs(self.strategy.delay_between_updates_secs),
            percentage: self.strategy.percentage,
            pre_command: self.strategy.pre_command.clone(),
            post_command: self.strategy.post_command.clone(),
            timeout: Duration::from_secs(self.strategy.timeout_secs),
            rollback_on_failure: self.strategy.rollback_on_failure,
            verification_period: self
                .strategy
                .verification_period_secs
                .map(Duration::from_secs),
            progression_steps: self.strategy.progression_steps,
            step_wait_time: Duration::from_secs(self.strategy.step_wait_secs),
        }
    }

    pub fn notify_events(&self) -> NotifyEvents {
        NotifyEvents {
            on_start: self.notifications.on_start,
            on_success: self.notifications.on_success,
            on_failure: self.notifications.on_failure,
            on_rollback: self.notifications.on_rollback,
        }
    }

    /// The compose file to operate on: the configured path, or the
    /// standard names probed in the working directory.
    pub fn resolve_compose_file(&self) -> Result<PathBuf, ComposeError> {
        match &self.compose.file {
            Some(path) => Ok(path.clone()),
            None => compose::locate_compose_file(Path::new(".")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.binary, "docker");
        assert_eq!(config.backup.max_history, 10);
        assert_eq!(config.strategy.kind, StrategyKind::OneAtATime);
        assert_eq!(config.health.failure_threshold, 3);
        assert!(config.strategy.rollback_on_failure);
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.strategy.timeout_secs, config.strategy.timeout_secs);
        assert_eq!(parsed.health.retry_interval_ms, config.health.retry_interval_ms);
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.engine.binary, config.engine.binary);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: Config = toml::from_str(
            "[strategy]\nkind = \"percentage\"\npercentage = 50\n",
        )
        .unwrap();
        assert_eq!(parsed.strategy.kind, StrategyKind::Percentage);
        assert_eq!(parsed.strategy.percentage, Some(50));
        assert_eq!(parsed.health.timeout_secs, 5);
    }

    #[test]
    fn test_invalid_bounds_rejected_at_load() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "[strategy]\ntimeout_secs = 0\n").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_strategy_config_conversion() {
        let mut config = Config::default();
        config.strategy.delay_between_updates_secs = 7;
        config.strategy.verification_period_secs = Some(30);
        let strategy = config.strategy_config();
        assert_eq!(strategy.delay_between_updates, Duration::from_secs(7));
        assert_eq!(strategy.verification_period, Some(Duration::from_secs(30)));
        assert_eq!(strategy.health_check.retry_interval, Duration::from_millis(1000));
    }
}
