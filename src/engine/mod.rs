//! Container engine surface
//!
//! The updater depends on a deliberately narrow capability set: list
//! containers, inspect one, exec inside one, and bring a single compose
//! service up. Everything engine-specific hides behind the [`Engine`]
//! trait; [`docker::DockerCli`] is the shipped implementation.

pub mod docker;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

/// One row of the engine's container listing.
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub labels: HashMap<String, String>,
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    /// Engine-reported lifecycle state (`running`, `exited`, ...).
    pub state: String,
    /// Native healthcheck status when the image declares one.
    pub health_status: Option<String>,
    /// IP address on the first attached network.
    pub ip_address: Option<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
}

/// Captured output of an in-container command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Narrow command surface over the container runtime.
#[async_trait]
pub trait Engine: Send + Sync {
    /// List all containers known to the engine, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Inspect a container by id.
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails, EngineError>;

    /// Run a command inside a container. A non-zero exit code is reported
    /// through [`ExecOutput::exit_code`], not as an error.
    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, EngineError>;

    /// Apply the compose file, restarting only the named service.
    async fn compose_up(&self, compose_file: &Path, service: &str) -> Result<(), EngineError>;
}
