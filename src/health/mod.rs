//! Health verification
//!
//! Four checker kinds share one counter-and-gate helper ([`state::ProbeState`])
//! and differ only in how a single probe runs: inspect the container's
//! native healthcheck, GET an HTTP endpoint, dial a TCP port, or exec a
//! command inside the container. [`HealthChecker::new`] is the factory;
//! structural problems (missing endpoint, bad port, no container id) fail
//! there, while transport problems during probing count as failed checks.

pub mod probes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::HealthError;
use crate::replica::Replica;
use state::{ProbeSnapshot, ProbeState};

/// Checker kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Container,
    Http,
    Tcp,
    Command,
}

/// Configuration for one checker instance.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub kind: CheckKind,
    /// HTTP path, required for the `http` kind.
    pub endpoint: Option<String>,
    /// Port for `http` (defaults to 80) and `tcp` (required).
    pub port: Option<u16>,
    /// Shell command for the `command` kind.
    pub command: Option<String>,
    /// Bound on a single probe.
    pub timeout: Duration,
    /// Minimum spacing between live probes.
    pub retry_interval: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: CheckKind::Container,
            endpoint: None,
            port: None,
            command: None,
            timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
            success_threshold: 1,
            failure_threshold: 3,
        }
    }
}

impl HealthCheckConfig {
    /// Enforce the documented bounds.
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.timeout < Duration::from_secs(1) || self.timeout > Duration::from_secs(300) {
            return Err(HealthError::InvalidConfig(format!(
                "timeout {:?} outside [1s, 5m]",
                self.timeout
            )));
        }
        if self.retry_interval < Duration::from_millis(100) {
            return Err(HealthError::InvalidConfig(format!(
                "retry interval {:?} below 100ms",
                self.retry_interval
            )));
        }
        for (label, value) in [
            ("success_threshold", self.success_threshold),
            ("failure_threshold", self.failure_threshold),
        ] {
            if !(1..=10).contains(&value) {
                return Err(HealthError::InvalidConfig(format!(
                    "{label} {value} outside [1, 10]"
                )));
            }
        }
        Ok(())
    }
}

enum Probe {
    Container {
        engine: Arc<dyn Engine>,
        container_id: String,
    },
    Http {
        client: reqwest::Client,
        url: String,
    },
    Tcp {
        address: String,
    },
    Command {
        engine: Arc<dyn Engine>,
        container_id: String,
        argv: Vec<String>,
    },
}

/// One checker bound to one replica.
pub struct HealthChecker {
    service_id: String,
    timeout: Duration,
    state: ProbeState,
    probe: Probe,
}

impl HealthChecker {
    /// Build the checker matching `config.kind` for `replica`.
    ///
    /// HTTP and TCP probes target the replica's inspected network address
    /// and fall back to localhost for port-published setups.
    pub fn new(
        config: &HealthCheckConfig,
        replica: &Replica,
        engine: Arc<dyn Engine>,
    ) -> Result<Self, HealthError> {
        config.validate()?;

        let address = replica
            .ip_address
            .clone()
            .unwrap_or_else(|| "localhost".to_string());

        let probe = match config.kind {
            CheckKind::Container => {
                if replica.container_id.is_empty() {
                    return Err(HealthError::InvalidConfig(format!(
                        "container check for {} without a container id",
                        replica.service_id()
                    )));
                }
                Probe::Container {
                    engine,
                    container_id: replica.container_id.clone(),
                }
            }
            CheckKind::Http => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    HealthError::InvalidConfig("http check requires an endpoint".to_string())
                })?;
                let port = config.port.unwrap_or(80);
                let path = if endpoint.starts_with('/') {
                    endpoint.to_string()
                } else {
                    format!("/{endpoint}")
                };
                let client = reqwest::Client::builder()
                    .timeout(config.timeout)
                    .build()
                    .map_err(|e| HealthError::InvalidConfig(e.to_string()))?;
                Probe::Http {
                    client,
                    url: format!("http://{address}:{port}{path}"),
                }
            }
            CheckKind::Tcp => {
                let port = config.port.filter(|p| *p > 0).ok_or_else(|| {
                    HealthError::InvalidConfig("tcp check requires a positive port".to_string())
                })?;
                Probe::Tcp {
                    address: format!("{address}:{port}"),
                }
            }
            CheckKind::Command => {
                if replica.container_id.is_empty() {
                    return Err(HealthError::InvalidConfig(format!(
                        "command check for {} without a container id",
                        replica.service_id()
                    )));
                }
                let command = config.command.as_deref().ok_or_else(|| {
                    HealthError::InvalidConfig("command check requires a command".to_string())
                })?;
                Probe::Command {
                    engine,
                    container_id: replica.container_id.clone(),
                    argv: vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ],
                }
            }
        };

        Ok(Self {
            service_id: replica.service_id(),
            timeout: config.timeout,
            state: ProbeState::new(
                config.success_threshold,
                config.failure_threshold,
                config.retry_interval,
            ),
            probe,
        })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Run one (rate-limited) check and return the thresholded status.
    /// When called faster than `retry_interval` the cached status is
    /// returned without a live probe.
    pub async fn check(&self) -> bool {
        if !self.state.should_check().await {
            return self.state.status().await;
        }
        let (healthy, message) = match tokio::time::timeout(self.timeout, self.run_probe()).await {
            Ok(outcome) => outcome,
            Err(_) => (false, format!("probe timed out after {:?}", self.timeout)),
        };
        self.state.update_status(healthy, message).await;
        self.state.status().await
    }

    pub async fn status(&self) -> bool {
        self.state.status().await
    }

    pub async fn snapshot(&self) -> ProbeSnapshot {
        self.state.snapshot().await
    }

    async fn run_probe(&self) -> (bool, String) {
        match &self.probe {
            Probe::Container {
                engine,
                container_id,
            } => probes::container(engine, container_id).await,
            Probe::Http { client, url } => probes::http(client, url).await,
            Probe::Tcp { address } => probes::tcp(address, self.timeout).await,
            Probe::Command {
                engine,
                container_id,
                argv,
            } => probes::command(engine, container_id, argv, self.timeout).await,
        }
    }
}
