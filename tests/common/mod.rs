//! Shared test doubles: a scripted engine, a counting replica updater and
//! a recording notifier.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use rollsync::engine::{ContainerDetails, ContainerSummary, Engine, ExecOutput};
use rollsync::error::{EngineError, NotifyError, ReplicaError};
use rollsync::notify::Notifier;
use rollsync::replica::{Replica, ReplicaStatus, ReplicaUpdater};

/// Engine double with a scripted container inventory.
#[derive(Default)]
pub struct MockEngine {
    containers: Mutex<Vec<ContainerSummary>>,
    details: Mutex<HashMap<String, ContainerDetails>>,
    unhealthy: Mutex<HashSet<String>>,
    compose_up_calls: Mutex<Vec<String>>,
    fail_compose_up_for: Mutex<HashSet<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `replicas` running containers named
    /// `{project}_{service}_{index}` with healthy native healthchecks.
    pub fn add_service(&self, project: &str, service: &str, replicas: u32, image: &str) {
        let mut containers = self.containers.lock().unwrap();
        let mut details = self.details.lock().unwrap();
        for index in 1..=replicas {
            let id = format!("{service}-c{index}");
            containers.push(ContainerSummary {
                id: id.clone(),
                names: vec![format!("{project}_{service}_{index}")],
                image: image.to_string(),
                state: "running".to_string(),
                labels: HashMap::new(),
            });
            details.insert(
                id.clone(),
                ContainerDetails {
                    id,
                    state: "running".to_string(),
                    health_status: Some("healthy".to_string()),
                    ip_address: Some(format!("172.20.0.{index}")),
                    image: image.to_string(),
                    labels: HashMap::new(),
                },
            );
        }
    }

    /// Make one container report unhealthy from now on.
    pub fn set_unhealthy(&self, container_id: &str) {
        self.unhealthy
            .lock()
            .unwrap()
            .insert(container_id.to_string());
    }

    pub fn fail_compose_up(&self, service: &str) {
        self.fail_compose_up_for
            .lock()
            .unwrap()
            .insert(service.to_string());
    }

    /// Services passed to `compose_up`, in call order.
    pub fn compose_ups(&self) -> Vec<String> {
        self.compose_up_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails, EngineError> {
        let mut details = self
            .details
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or_else(|| EngineError::Parse(format!("unknown container {container_id}")))?;
        if self.unhealthy.lock().unwrap().contains(container_id) {
            details.health_status = Some("unhealthy".to_string());
        }
        Ok(details)
    }

    async fn exec(
        &self,
        _container_id: &str,
        _command: &[String],
        _timeout: Duration,
    ) -> Result<ExecOutput, EngineError> {
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn compose_up(&self, _compose_file: &Path, service: &str) -> Result<(), EngineError> {
        if self.fail_compose_up_for.lock().unwrap().contains(service) {
            return Err(EngineError::CommandFailed {
                command: format!("compose up {service}"),
                status: 1,
                output: "simulated failure".to_string(),
            });
        }
        self.compose_up_calls
            .lock()
            .unwrap()
            .push(service.to_string());
        Ok(())
    }
}

/// Replica updater double that records calls instead of touching files.
#[derive(Default)]
pub struct CountingUpdater {
    updates: Mutex<Vec<(String, String)>>,
    rollbacks: Mutex<Vec<(String, Option<String>)>>,
    fail_update_for: Mutex<HashSet<String>>,
}

impl CountingUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_update(&self, service_id: &str) {
        self.fail_update_for
            .lock()
            .unwrap()
            .insert(service_id.to_string());
    }

    /// `(replica service_id, tag)` pairs in update order.
    pub fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }

    /// `(service, replica service_id)` pairs; `None` marks a
    /// service-level rollback with no touched replica.
    pub fn rollbacks(&self) -> Vec<(String, Option<String>)> {
        self.rollbacks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplicaUpdater for CountingUpdater {
    async fn update(&self, replica: &Replica, new_tag: &str) -> Result<(), ReplicaError> {
        let id = replica.service_id();
        if self.fail_update_for.lock().unwrap().contains(&id) {
            return Err(ReplicaError::UpdateFailed {
                replica: id,
                reason: "simulated update failure".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((id, new_tag.to_string()));
        Ok(())
    }

    async fn rollback(
        &self,
        service: &str,
        replica: Option<&Replica>,
    ) -> Result<(), ReplicaError> {
        self.rollbacks
            .lock()
            .unwrap()
            .push((service.to_string(), replica.map(|r| r.service_id())));
        Ok(())
    }
}

/// Notifier double recording every event as a formatted line.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn should_notify_on_start(&self) -> bool {
        true
    }

    fn should_notify_on_success(&self) -> bool {
        true
    }

    fn should_notify_on_failure(&self) -> bool {
        true
    }

    fn should_notify_on_rollback(&self) -> bool {
        true
    }

    async fn notify_start(&self, service: &str, version: &str) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("start:{service}:{version}"));
        Ok(())
    }

    async fn notify_success(
        &self,
        service: &str,
        version: &str,
        duration: Duration,
    ) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(format!(
            "success:{service}:{version}:{}ms",
            duration.as_millis()
        ));
        Ok(())
    }

    async fn notify_failure(
        &self,
        service: &str,
        version: &str,
        _reason: &str,
    ) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("failure:{service}:{version}"));
        Ok(())
    }

    async fn notify_rollback(
        &self,
        service: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("rollback:{service}:{from_version}:{to_version}"));
        Ok(())
    }
}

/// Hand-built replica for strategy-level tests.
pub fn replica(service: &str, replica_id: &str, container_id: &str, tag: &str) -> Replica {
    Replica {
        service_name: service.to_string(),
        replica_id: replica_id.to_string(),
        container_id: container_id.to_string(),
        status: ReplicaStatus::Running,
        image: format!("acme/{service}:{tag}"),
        image_tag: tag.to_string(),
        ip_address: None,
        version: tag.to_string(),
        parameters: HashMap::new(),
    }
}
