//! Service dependency graph
//!
//! Built from `depends_on`: one node per service, one edge from each
//! service to each of its direct dependencies. Update order is a
//! depth-first topological sort with tri-colour marking so a cycle can be
//! reported with its member vertices; dependent lookup walks the graph in
//! reverse.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tracing::debug;

use crate::compose::ComposeModel;
use crate::error::DependencyError;
use crate::strategy::StrategyKind;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Grey,
    Black,
}

pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    /// Direct dependencies in declaration order, for deterministic sorts.
    deps: HashMap<String, Vec<String>>,
    /// Compose document order.
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph from a validated compose model. The model already
    /// guarantees every `depends_on` entry names a declared service.
    pub fn from_model(model: &ComposeModel) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut deps = HashMap::new();
        let order: Vec<String> = model.service_names().to_vec();

        for name in &order {
            let node = graph.add_node(name.clone());
            index.insert(name.clone(), node);
        }
        for name in &order {
            let direct = model
                .service(name)
                .map(|spec| spec.depends_on.clone())
                .unwrap_or_default();
            for dep in &direct {
                graph.add_edge(index[name], index[dep], ());
            }
            deps.insert(name.clone(), direct);
        }

        Self {
            graph,
            index,
            deps,
            order,
        }
    }

    /// Topological sort of `subset` plus everything it transitively
    /// depends on, dependencies first. Deterministic: ties break by
    /// compose order.
    pub fn update_order(&self, subset: &[&str]) -> Result<Vec<String>, DependencyError> {
        let closure = self.dependency_closure(subset)?;
        let mut marks: HashMap<String, Mark> = closure
            .iter()
            .map(|name| (name.clone(), Mark::White))
            .collect();
        let mut path: Vec<String> = Vec::new();
        let mut sorted: Vec<String> = Vec::with_capacity(closure.len());

        for name in &self.order {
            if closure.contains(name) {
                self.visit(name, &mut marks, &mut path, &mut sorted)?;
            }
        }
        Ok(sorted)
    }

    fn visit(
        &self,
        name: &str,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
        sorted: &mut Vec<String>,
    ) -> Result<(), DependencyError> {
        match marks.get(name).copied() {
            Some(Mark::Black) => return Ok(()),
            Some(Mark::Grey) => {
                // close the cycle at its first occurrence on the path
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(DependencyError::CircularDependency { cycle });
            }
            _ => {}
        }

        marks.insert(name.to_string(), Mark::Grey);
        path.push(name.to_string());

        if let Some(direct) = self.deps.get(name) {
            for dep in direct {
                self.visit(dep, marks, path, sorted)?;
            }
        }

        path.pop();
        marks.insert(name.to_string(), Mark::Black);
        sorted.push(name.to_string());
        Ok(())
    }

    /// Services that directly or transitively depend on `service`, in
    /// compose order.
    pub fn dependents(&self, service: &str) -> Result<Vec<String>, DependencyError> {
        let start = *self
            .index
            .get(service)
            .ok_or_else(|| DependencyError::UnknownService(service.to_string()))?;

        let reversed = Reversed(&self.graph);
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                reached.insert(self.graph[node].clone());
            }
        }

        Ok(self
            .order
            .iter()
            .filter(|name| reached.contains(*name))
            .cloned()
            .collect())
    }

    /// Whether updating `service` should cascade to its dependents. The
    /// strategy kind is reserved for future per-strategy policies.
    pub fn should_update_dependents(
        &self,
        service: &str,
        kind: &StrategyKind,
    ) -> Result<bool, DependencyError> {
        let dependents = self.dependents(service)?;
        debug!(service, ?kind, count = dependents.len(), "dependent check");
        Ok(!dependents.is_empty())
    }

    /// `subset` plus its transitive dependencies.
    fn dependency_closure(&self, subset: &[&str]) -> Result<HashSet<String>, DependencyError> {
        let mut closure = HashSet::new();
        let mut stack: Vec<String> = Vec::new();

        for name in subset {
            if !self.index.contains_key(*name) {
                return Err(DependencyError::UnknownService((*name).to_string()));
            }
            stack.push((*name).to_string());
        }
        while let Some(name) = stack.pop() {
            if !closure.insert(name.clone()) {
                continue;
            }
            if let Some(direct) = self.deps.get(&name) {
                for dep in direct {
                    if !closure.contains(dep) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn model(content: &str) -> ComposeModel {
        ComposeModel::parse(content, Path::new("/tmp/shop/docker-compose.yml")).unwrap()
    }

    const CHAIN: &str = "services:\n  web:\n    image: web:v1\n    depends_on: [api]\n  api:\n    image: api:v1\n    depends_on: [db]\n  db:\n    image: db:v1\n";

    #[test]
    fn test_update_order_dependencies_first() {
        let graph = DependencyGraph::from_model(&model(CHAIN));
        assert_eq!(graph.update_order(&["web"]).unwrap(), ["db", "api", "web"]);
        assert_eq!(graph.update_order(&["api"]).unwrap(), ["db", "api"]);
        assert_eq!(graph.update_order(&["db"]).unwrap(), ["db"]);
    }

    #[test]
    fn test_update_order_diamond() {
        let content = "services:\n  web:\n    image: web:v1\n    depends_on: [api, cache]\n  api:\n    image: api:v1\n    depends_on: [db]\n  cache:\n    image: cache:v1\n    depends_on: [db]\n  db:\n    image: db:v1\n";
        let graph = DependencyGraph::from_model(&model(content));
        let order = graph.update_order(&["web"]).unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("db") < pos("api"));
        assert!(pos("db") < pos("cache"));
        assert!(pos("api") < pos("web"));
        assert!(pos("cache") < pos("web"));
    }

    #[test]
    fn test_cycle_detection_reports_vertices() {
        let content = "services:\n  a:\n    image: a:v1\n    depends_on: [b]\n  b:\n    image: b:v1\n    depends_on: [c]\n  c:\n    image: c:v1\n    depends_on: [a]\n";
        let graph = DependencyGraph::from_model(&model(content));
        let err = graph.update_order(&["a"]).unwrap_err();
        match err {
            DependencyError::CircularDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                for name in ["a", "b", "c"] {
                    assert!(cycle.contains(&name.to_string()), "{name} missing from {cycle:?}");
                }
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dependents_are_transitive() {
        let graph = DependencyGraph::from_model(&model(CHAIN));
        assert_eq!(graph.dependents("db").unwrap(), ["web", "api"]);
        assert_eq!(graph.dependents("api").unwrap(), ["web"]);
        assert!(graph.dependents("web").unwrap().is_empty());
    }

    #[test]
    fn test_should_update_dependents() {
        let graph = DependencyGraph::from_model(&model(CHAIN));
        assert!(graph
            .should_update_dependents("db", &StrategyKind::OneAtATime)
            .unwrap());
        assert!(!graph
            .should_update_dependents("web", &StrategyKind::OneAtATime)
            .unwrap());
    }

    #[test]
    fn test_unknown_service() {
        let graph = DependencyGraph::from_model(&model(CHAIN));
        assert!(matches!(
            graph.update_order(&["ghost"]),
            Err(DependencyError::UnknownService(_))
        ));
    }
}
