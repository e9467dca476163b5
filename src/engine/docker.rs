//! Docker CLI adapter
//!
//! Drives the `docker` binary as a subprocess. Listing uses the JSON
//! format template so no table output is scraped; inspect output is the
//! engine's own JSON document.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::engine::{ContainerDetails, ContainerSummary, Engine, ExecOutput};
use crate::error::EngineError;

/// Engine implementation shelling out to the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a docker subcommand, returning stdout. Stderr is folded into
    /// the error on failure.
    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        trace!(binary = %self.binary, ?args, "running engine command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    EngineError::Unavailable(format!("{} not found on PATH", self.binary))
                }
                _ => EngineError::Io(e),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(EngineError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                status: output.status.code().unwrap_or(-1),
                output: combined.trim().to_string(),
            })
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl Engine for DockerCli {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let stdout = self
            .run(&["ps", "--all", "--no-trunc", "--format", "{{json .}}"])
            .await?;
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails, EngineError> {
        let stdout = self.run(&["inspect", container_id]).await?;
        parse_inspect(&stdout)
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, EngineError> {
        let mut args: Vec<&str> = vec!["exec", container_id];
        args.extend(command.iter().map(String::as_str));
        debug!(container = container_id, ?command, "exec in container");

        let fut = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output();
        let output = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| EngineError::Timeout {
                command: format!("exec {container_id}"),
                seconds: timeout.as_secs(),
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    EngineError::Unavailable(format!("{} not found on PATH", self.binary))
                }
                _ => EngineError::Io(e),
            })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn compose_up(&self, compose_file: &Path, service: &str) -> Result<(), EngineError> {
        let file = compose_file.to_string_lossy();
        self.run(&["compose", "-f", &file, "up", "-d", "--no-deps", service])
            .await?;
        Ok(())
    }
}

/// Parse one `docker ps --format '{{json .}}'` line.
fn parse_ps_line(line: &str) -> Result<ContainerSummary, EngineError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string()))?;
    let field = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or("");

    Ok(ContainerSummary {
        id: field("ID").to_string(),
        names: field("Names")
            .split(',')
            .filter(|n| !n.is_empty())
            .map(|n| n.trim_start_matches('/').to_string())
            .collect(),
        image: field("Image").to_string(),
        state: field("State").to_string(),
        labels: parse_label_list(field("Labels")),
    })
}

/// Labels arrive as `key=value,key2=value2`.
fn parse_label_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Parse `docker inspect` output (a JSON array with one document).
fn parse_inspect(raw: &str) -> Result<ContainerDetails, EngineError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;
    let doc = value
        .as_array()
        .and_then(|docs| docs.first())
        .ok_or_else(|| EngineError::Parse("inspect returned no documents".to_string()))?;

    let state = doc
        .pointer("/State/Status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let health_status = doc
        .pointer("/State/Health/Status")
        .and_then(Value::as_str)
        .map(str::to_string);
    let image = doc
        .pointer("/Config/Image")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut labels = HashMap::new();
    if let Some(map) = doc.pointer("/Config/Labels").and_then(Value::as_object) {
        for (key, val) in map {
            if let Some(val) = val.as_str() {
                labels.insert(key.clone(), val.to_string());
            }
        }
    }

    // first attached network with a non-empty address, falling back to the
    // legacy top-level field
    let mut ip_address = None;
    if let Some(networks) = doc
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
    {
        ip_address = networks
            .values()
            .filter_map(|net| net.get("IPAddress").and_then(Value::as_str))
            .find(|ip| !ip.is_empty())
            .map(str::to_string);
    }
    if ip_address.is_none() {
        ip_address = doc
            .pointer("/NetworkSettings/IPAddress")
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);
    }

    Ok(ContainerDetails {
        id: doc
            .pointer("/Id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        state,
        health_status,
        ip_address,
        image,
        labels,
    })
}
