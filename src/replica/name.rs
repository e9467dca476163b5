//! Name-based replica detection
//!
//! Compose files sometimes spell a replica set out as separately named
//! services: `web-blue` / `web-green`, or `worker_1` / `worker_2`. Service
//! names matching `^(.+)[-_.](\w+)$` are grouped by the captured base; a
//! group only counts as a replica set when it has at least two members, so
//! unrelated names like `message-broker` are left alone.
//!
//! Members without a live container still produce a placeholder replica
//! with `not_found` status, so callers see the declared topology.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::compose::{split_image_tag, ComposeModel};
use crate::engine::Engine;
use crate::error::ReplicaError;
use crate::replica::{
    replica_from_details, scale::container_name_pattern, DetectorKind, Replica, ReplicaDetector,
    ReplicaMap, ReplicaStatus, PARAM_COMPOSE_SERVICE,
};

pub struct NameDetector {
    engine: Arc<dyn Engine>,
}

impl NameDetector {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }
}

/// Split a service name into (base, suffix) per the grouping convention.
pub(crate) fn split_group_name(service: &str) -> Option<(String, String)> {
    let pattern = Regex::new(r"^(.+)[-_.](\w+)$").expect("static regex");
    let caps = pattern.captures(service)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Group candidate service names by base, preserving compose order within
/// each group. Groups with fewer than two members are dropped.
pub(crate) fn group_services(names: &[String]) -> Vec<(String, Vec<(String, String)>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for name in names {
        if let Some((base, suffix)) = split_group_name(name) {
            if !groups.contains_key(&base) {
                order.push(base.clone());
            }
            groups
                .entry(base)
                .or_default()
                .push((name.clone(), suffix));
        }
    }
    order
        .into_iter()
        .filter_map(|base| {
            let members = groups.remove(&base)?;
            (members.len() >= 2).then_some((base, members))
        })
        .collect()
}

#[async_trait]
impl ReplicaDetector for NameDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Name
    }

    async fn detect(&self, model: &ComposeModel) -> Result<ReplicaMap, ReplicaError> {
        let groups = group_services(model.service_names());
        if groups.is_empty() {
            return Ok(ReplicaMap::new());
        }

        let containers = self.engine.list_containers().await?;
        let mut result = ReplicaMap::new();

        for (base, members) in groups {
            let mut replicas = Vec::with_capacity(members.len());
            for (member, suffix) in members {
                let pattern = container_name_pattern(model.project(), &member)?;
                let container = containers.iter().find(|container| {
                    container
                        .names
                        .iter()
                        .any(|name| pattern.is_match(name) || name == &member)
                });

                let replica = match container {
                    Some(container) => {
                        let details = self.engine.inspect(&container.id).await?;
                        replica_from_details(&base, &suffix, &member, details)
                    }
                    None => placeholder(model, &base, &suffix, &member),
                };
                replicas.push(replica);
            }
            debug!(base = %base, members = replicas.len(), "name group detected");
            result.insert(base, replicas);
        }

        Ok(result)
    }
}

/// Declared-but-not-running member of a name group.
fn placeholder(model: &ComposeModel, base: &str, suffix: &str, member: &str) -> Replica {
    let image = model
        .service(member)
        .and_then(|spec| spec.image.clone())
        .unwrap_or_default();
    let image_tag = split_image_tag(&image).1.unwrap_or_default().to_string();
    let mut parameters = HashMap::new();
    parameters.insert(PARAM_COMPOSE_SERVICE.to_string(), member.to_string());
    Replica {
        service_name: base.to_string(),
        replica_id: suffix.to_string(),
        container_id: String::new(),
        status: ReplicaStatus::NotFound,
        version: image_tag.clone(),
        image,
        image_tag,
        ip_address: None,
        parameters,
    }
}
