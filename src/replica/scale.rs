//! Scale-based replica detection
//!
//! Services declaring `scale` or `deploy.replicas` run as several
//! containers named `{project}_{service}_{index}` (newer engines use `-`
//! as the separator). The numeric suffix becomes the replica id.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::compose::ComposeModel;
use crate::engine::Engine;
use crate::error::ReplicaError;
use crate::replica::{
    replica_from_details, DetectorKind, ReplicaDetector, ReplicaMap, PARAM_EXPECTED_REPLICAS,
};

pub struct ScaleDetector {
    engine: Arc<dyn Engine>,
}

impl ScaleDetector {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }
}

/// Matcher for the canonical scaled-container name.
pub(crate) fn container_name_pattern(project: &str, service: &str) -> Result<Regex, ReplicaError> {
    Regex::new(&format!(
        "^{}[-_]{}[-_](\\d+)$",
        regex::escape(project),
        regex::escape(service)
    ))
    .map_err(|e| ReplicaError::DetectionFailed(e.to_string()))
}

#[async_trait]
impl ReplicaDetector for ScaleDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Scale
    }

    async fn detect(&self, model: &ComposeModel) -> Result<ReplicaMap, ReplicaError> {
        let scaled: Vec<(&str, u32)> = model
            .service_names()
            .iter()
            .filter_map(|name| {
                let hint = model.service(name).and_then(|spec| spec.replica_hint());
                match hint {
                    Some(expected) if expected > 0 => Some((name.as_str(), expected)),
                    _ => None,
                }
            })
            .collect();
        if scaled.is_empty() {
            return Ok(ReplicaMap::new());
        }

        let containers = self.engine.list_containers().await?;
        let mut result = ReplicaMap::new();

        for (service, expected) in scaled {
            let pattern = container_name_pattern(model.project(), service)?;
            let mut replicas = Vec::new();

            for container in &containers {
                let Some(index) = container
                    .names
                    .iter()
                    .find_map(|name| pattern.captures(name))
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                else {
                    continue;
                };

                let details = self.engine.inspect(&container.id).await?;
                let mut replica = replica_from_details(service, &index, service, details);
                replica
                    .parameters
                    .insert(PARAM_EXPECTED_REPLICAS.to_string(), expected.to_string());
                replicas.push(replica);
            }

            replicas.sort_by_key(|r| r.replica_id.parse::<u64>().unwrap_or(u64::MAX));
            debug!(
                service,
                expected,
                found = replicas.len(),
                "scale detection pass"
            );
            result.insert(service.to_string(), replicas);
        }

        Ok(result)
    }
}
