//! Error handling for rollsync
//!
//! This module provides the error types for the whole application. Every
//! component owns a dedicated enum; [`RollsyncError`] wraps them and carries
//! the classification the orchestrator's recovery loop acts on.

use thiserror::Error;

/// Main error type for rollsync operations
#[derive(Error, Debug)]
pub enum RollsyncError {
    /// Compose file parsing and rewriting errors
    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    /// Container engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Replica detection errors
    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),

    /// Dependency resolution errors
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    /// Health verification errors
    #[error("Health error: {0}")]
    Health(#[from] HealthError),

    /// Update strategy errors
    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    /// Backup and rollback errors
    #[error("Rollback error: {0}")]
    Rollback(#[from] RollbackError),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

/// Compose model and rewrite errors
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("compose file not found in {0}")]
    FileNotFound(String),

    #[error("failed to read compose file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse compose file: {0}")]
    Parse(String),

    #[error("service not declared in compose file: {0}")]
    ServiceNotFound(String),

    #[error("service {service} declares unknown dependency {dependency}")]
    UnknownDependency { service: String, dependency: String },

    #[error("no image line found for service {0}")]
    ImageLineNotFound(String),

    #[error("failed to write compose file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Container engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine command `{command}` failed with {status}: {output}")]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    #[error("engine command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("failed to parse engine output: {0}")]
    Parse(String),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replica detection errors
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("replica detection failed: {0}")]
    DetectionFailed(String),

    #[error("no replicas detected for service {0}")]
    NoneDetected(String),

    #[error("failed to update replica {replica}: {reason}")]
    UpdateFailed { replica: String, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

/// Dependency graph errors
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("service not present in dependency graph: {0}")]
    UnknownService(String),
}

/// Health verification errors
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("invalid health check configuration: {0}")]
    InvalidConfig(String),

    #[error("health check for {service_id} timed out: {message}")]
    Timeout { service_id: String, message: String },

    #[error("{service_id} failed {failures} consecutive health checks: {message}")]
    FailureThreshold {
        service_id: String,
        failures: u32,
        message: String,
    },
}

/// Update strategy errors
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("invalid strategy configuration: {0}")]
    InvalidConfig(String),

    #[error("strategy deadline exceeded while {0}")]
    DeadlineExceeded(String),

    #[error("pre-update command failed for {replica}: {reason}")]
    PreCommand { replica: String, reason: String },

    #[error("post-update command failed for {replica}: {reason}")]
    PostCommand { replica: String, reason: String },

    #[error(transparent)]
    Update(#[from] ReplicaError),

    #[error(transparent)]
    Health(#[from] HealthError),
}

/// Backup and rollback errors
#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("failed to snapshot compose file: {0}")]
    BackupIo(String),

    #[error("failed to restore compose file: {0}")]
    RestoreIo(String),

    #[error("no rollback history for service {0}")]
    NoHistory(String),

    #[error("no backup with tag {version} for service {service}")]
    VersionNotFound { service: String, version: String },

    #[error("image tag {0} cannot be recorded in a snapshot filename")]
    UnsupportedTag(String),
}

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to send notification: {0}")]
    Send(String),

    #[error("invalid notifier configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("another update holds the compose lock: {0}")]
    Locked(String),
}

impl RollsyncError {
    /// Component tag used in logs and recovery decisions.
    pub fn component(&self) -> &'static str {
        match self {
            RollsyncError::Compose(_) => "compose",
            RollsyncError::Engine(_) => "engine",
            RollsyncError::Replica(_) => "replica",
            RollsyncError::Dependency(_) => "dependency",
            RollsyncError::Health(_) => "health",
            RollsyncError::Strategy(_) => "strategy",
            RollsyncError::Rollback(_) => "rollback",
            RollsyncError::Notify(_) => "observability",
            RollsyncError::Config(_) => "config",
            RollsyncError::Io(_) => "io",
            RollsyncError::Custom(_) => "general",
        }
    }

    /// Whether a surfaced error of this kind must abort the update.
    pub fn is_critical(&self) -> bool {
        !matches!(self, RollsyncError::Notify(_))
    }

    /// Whether the orchestrator may retry before surfacing the error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RollsyncError::Compose(_) => false,
            RollsyncError::Engine(_) => false,
            RollsyncError::Replica(inner) => {
                !matches!(inner, ReplicaError::Engine(EngineError::Unavailable(_)))
            }
            RollsyncError::Dependency(inner) => {
                !matches!(inner, DependencyError::CircularDependency { .. })
            }
            RollsyncError::Health(inner) => matches!(inner, HealthError::Timeout { .. }),
            RollsyncError::Strategy(inner) => match inner {
                StrategyError::InvalidConfig(_) => false,
                StrategyError::Health(HealthError::FailureThreshold { .. }) => false,
                StrategyError::Update(ReplicaError::Engine(EngineError::Unavailable(_))) => false,
                _ => true,
            },
            RollsyncError::Rollback(_) => false,
            RollsyncError::Notify(_) => true,
            RollsyncError::Config(_) => false,
            RollsyncError::Io(_) => false,
            RollsyncError::Custom(_) => false,
        }
    }
}

/// Result type alias for rollsync operations
pub type Result<T> = std::result::Result<T, RollsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_tags() {
        let err = RollsyncError::Health(HealthError::Timeout {
            service_id: "web-1".to_string(),
            message: "no response".to_string(),
        });
        assert_eq!(err.component(), "health");
        assert!(err.is_critical());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_circular_dependency_is_terminal() {
        let err = RollsyncError::Dependency(DependencyError::CircularDependency {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        });
        assert!(err.is_critical());
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Dependency error: circular dependency: a -> b -> a"
        );
    }

    #[test]
    fn test_notifier_errors_are_noncritical() {
        let err = RollsyncError::Notify(NotifyError::Send("connection refused".to_string()));
        assert!(!err.is_critical());
        assert!(err.is_recoverable());
        assert_eq!(err.component(), "observability");
    }

    #[test]
    fn test_failure_threshold_is_not_retried() {
        let err = RollsyncError::Health(HealthError::FailureThreshold {
            service_id: "web-2".to_string(),
            failures: 3,
            message: "HTTP 503".to_string(),
        });
        assert!(!err.is_recoverable());
    }
}
