//! Replica detection and replica-level update plumbing
//!
//! A replica is one running instance of a compose service. Two detectors
//! discover them: [`scale::ScaleDetector`] for services scaled through
//! `scale`/`deploy.replicas`, and [`name::NameDetector`] for replica sets
//! spelled out as separately named services (`web-blue`, `web-green`).
//! The [`ReplicaManager`] merges detector output behind a cache and is the
//! single place that rewrites the compose file and restarts a service.

pub mod name;
pub mod scale;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::compose::{rewrite, split_image_tag, ComposeModel};
use crate::engine::Engine;
use crate::error::ReplicaError;

/// Parameter key carrying the full compose service name for replicas whose
/// logical service is a name-group base (`web` for `web-blue`).
pub const PARAM_COMPOSE_SERVICE: &str = "compose_service";

/// Parameter key recording the declared replica count for scale groups.
pub const PARAM_EXPECTED_REPLICAS: &str = "expected_replicas";

/// Lifecycle state of a detected replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Running,
    Starting,
    Stopped,
    NotFound,
}

impl ReplicaStatus {
    /// Map an engine-reported container state onto the replica lifecycle.
    pub fn from_engine(state: &str) -> Self {
        match state {
            "running" => ReplicaStatus::Running,
            "created" | "restarting" | "starting" => ReplicaStatus::Starting,
            _ => ReplicaStatus::Stopped,
        }
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReplicaStatus::Running => "running",
            ReplicaStatus::Starting => "starting",
            ReplicaStatus::Stopped => "stopped",
            ReplicaStatus::NotFound => "not_found",
        };
        f.write_str(label)
    }
}

/// One instance of a service.
///
/// Replicas are rebuilt on every detection pass and carry no long-lived
/// identity; discarding and re-detecting is always safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub service_name: String,
    /// Discriminator within the service: a numeric index, a colour, or
    /// whatever suffix the naming convention uses.
    pub replica_id: String,
    /// Opaque engine handle; empty for placeholders.
    pub container_id: String,
    pub status: ReplicaStatus,
    /// Full image reference.
    pub image: String,
    /// Portion of the image reference after `:`.
    pub image_tag: String,
    pub ip_address: Option<String>,
    pub version: String,
    /// Labels and detector metadata.
    pub parameters: HashMap<String, String>,
}

impl Replica {
    /// Stable identifier `{service}-{replica_id}` used in logs and errors.
    pub fn service_id(&self) -> String {
        format!("{}-{}", self.service_name, self.replica_id)
    }

    /// The compose service to restart for this replica. For name-grouped
    /// replicas this is the full member service name, not the group base.
    pub fn compose_service(&self) -> &str {
        self.parameters
            .get(PARAM_COMPOSE_SERVICE)
            .map(String::as_str)
            .unwrap_or(&self.service_name)
    }
}

/// Detector registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Scale,
    Name,
}

/// Service name to ordered replica list.
pub type ReplicaMap = HashMap<String, Vec<Replica>>;

/// A strategy for discovering the replicas that belong to each service.
#[async_trait]
pub trait ReplicaDetector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    async fn detect(&self, model: &ComposeModel) -> Result<ReplicaMap, ReplicaError>;
}

/// The capability strategies need: update one replica to a tag, and roll
/// one back. `rollback` must accept `None` so callers can observe a
/// rollback attempt even when no replica was touched.
#[async_trait]
pub trait ReplicaUpdater: Send + Sync {
    async fn update(&self, replica: &Replica, new_tag: &str) -> Result<(), ReplicaError>;

    async fn rollback(&self, service: &str, replica: Option<&Replica>)
        -> Result<(), ReplicaError>;
}

/// Holds the detector registry, the merged detection cache, and the
/// compose file path every mutation goes through.
pub struct ReplicaManager {
    compose_path: PathBuf,
    engine: Arc<dyn Engine>,
    detectors: Vec<Box<dyn ReplicaDetector>>,
    cache: RwLock<Option<ReplicaMap>>,
}

impl ReplicaManager {
    /// Manager with both standard detectors registered.
    pub fn new(compose_path: impl Into<PathBuf>, engine: Arc<dyn Engine>) -> Self {
        let detectors: Vec<Box<dyn ReplicaDetector>> = vec![
            Box::new(scale::ScaleDetector::new(Arc::clone(&engine))),
            Box::new(name::NameDetector::new(Arc::clone(&engine))),
        ];
        Self::with_detectors(compose_path, engine, detectors)
    }

    pub fn with_detectors(
        compose_path: impl Into<PathBuf>,
        engine: Arc<dyn Engine>,
        detectors: Vec<Box<dyn ReplicaDetector>>,
    ) -> Self {
        Self {
            compose_path: compose_path.into(),
            engine,
            detectors,
            cache: RwLock::new(None),
        }
    }

    pub fn compose_path(&self) -> &Path {
        &self.compose_path
    }

    /// All detected replicas, populating the cache on first use.
    pub async fn get_all(&self) -> Result<ReplicaMap, ReplicaError> {
        {
            let cache = self.cache.read().await;
            if let Some(map) = cache.as_ref() {
                return Ok(map.clone());
            }
        }
        self.refresh().await?;
        let cache = self.cache.read().await;
        Ok(cache.clone().unwrap_or_default())
    }

    /// Cached replicas for one service; an unknown service yields an empty
    /// list rather than an error.
    pub async fn get_for(&self, service: &str) -> Result<Vec<Replica>, ReplicaError> {
        let all = self.get_all().await?;
        Ok(all.get(service).cloned().unwrap_or_default())
    }

    /// Drop the cache and re-run every registered detector. A single
    /// failing detector poisons the whole refresh; a partial view is
    /// worse than none.
    pub async fn refresh(&self) -> Result<(), ReplicaError> {
        let model = ComposeModel::load(&self.compose_path)?;
        let mut merged: ReplicaMap = HashMap::new();
        for detector in &self.detectors {
            let found = detector.detect(&model).await?;
            debug!(kind = ?detector.kind(), services = found.len(), "detector pass complete");
            for (service, replicas) in found {
                merged.entry(service).or_default().extend(replicas);
            }
        }
        let mut cache = self.cache.write().await;
        *cache = Some(merged);
        Ok(())
    }
}

#[async_trait]
impl ReplicaUpdater for ReplicaManager {
    async fn update(&self, replica: &Replica, new_tag: &str) -> Result<(), ReplicaError> {
        let target = replica.compose_service();
        if new_tag.is_empty() {
            // no-op update: restart and let the caller health-check
            debug!(replica = %replica.service_id(), "empty tag, restart without rewrite");
        } else {
            rewrite::set_image_tag(&self.compose_path, target, new_tag)?;
            info!(replica = %replica.service_id(), tag = new_tag, "image tag rewritten");
        }
        self.engine.compose_up(&self.compose_path, target).await?;
        Ok(())
    }

    async fn rollback(
        &self,
        service: &str,
        replica: Option<&Replica>,
    ) -> Result<(), ReplicaError> {
        match replica {
            Some(replica) if !replica.image_tag.is_empty() => {
                let target = replica.compose_service();
                rewrite::set_image_tag(&self.compose_path, target, &replica.image_tag)?;
                warn!(replica = %replica.service_id(), tag = %replica.image_tag, "rolled tag back");
                self.engine.compose_up(&self.compose_path, target).await?;
            }
            _ => {
                // nothing was touched for this service; restore the
                // in-place backup if the rewrite got that far
                let restored = rewrite::restore_in_place_backup(&self.compose_path)?;
                warn!(service, restored, "service-level rollback");
                self.engine.compose_up(&self.compose_path, service).await?;
            }
        }
        Ok(())
    }
}

/// Build a replica record from inspected container details, shared by both
/// detectors. `compose_service` is the service to restart for this
/// replica, which differs from `service_name` for name groups.
pub(crate) fn replica_from_details(
    service_name: &str,
    replica_id: &str,
    compose_service: &str,
    details: crate::engine::ContainerDetails,
) -> Replica {
    let image = details.image;
    let image_tag = split_image_tag(&image)
        .1
        .unwrap_or("latest")
        .to_string();
    let mut parameters: HashMap<String, String> = details.labels;
    parameters.insert(PARAM_COMPOSE_SERVICE.to_string(), compose_service.to_string());
    Replica {
        service_name: service_name.to_string(),
        replica_id: replica_id.to_string(),
        container_id: details.id,
        status: ReplicaStatus::from_engine(&details.state),
        version: image_tag.clone(),
        image,
        image_tag,
        ip_address: details.ip_address,
        parameters,
    }
}
