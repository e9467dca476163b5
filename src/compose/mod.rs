//! Compose model
//!
//! Parses the subset of the compose description the updater consumes:
//! per-service `image`, `scale`, `deploy.replicas`, `depends_on` (list or
//! mapping form) and `environment` (list or mapping form). The in-place
//! image rewrite lives in [`rewrite`] and is line-oriented on purpose; this
//! module never writes YAML back.

pub mod rewrite;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::ComposeError;

/// Compose file names probed by [`locate_compose_file`], in preference order.
const STANDARD_NAMES: [&str; 4] = [
    "docker-compose.yaml",
    "docker-compose.yml",
    "compose.yaml",
    "compose.yml",
];

/// One service entry from the compose description.
#[derive(Debug, Clone, Default)]
pub struct ServiceSpec {
    /// Full image reference (`[registry/]repo[:tag]`), if declared.
    pub image: Option<String>,
    /// Top-level `scale` hint.
    pub scale: Option<u32>,
    /// `deploy.replicas` hint.
    pub replicas: Option<u32>,
    /// Direct dependencies from `depends_on`.
    pub depends_on: Vec<String>,
    /// Environment entries, normalised to a key/value map.
    pub environment: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Declared replica count: `scale` wins over `deploy.replicas`.
    pub fn replica_hint(&self) -> Option<u32> {
        self.scale.or(self.replicas)
    }

    /// The `:tag` portion of the image reference, if present.
    pub fn image_tag(&self) -> Option<&str> {
        self.image.as_deref().and_then(|image| split_image_tag(image).1)
    }
}

/// Parsed compose description.
///
/// Service order follows the YAML document; strategies that update "in
/// compose order" rely on it.
#[derive(Debug, Clone)]
pub struct ComposeModel {
    path: PathBuf,
    project: String,
    order: Vec<String>,
    services: HashMap<String, ServiceSpec>,
}

impl ComposeModel {
    /// Load and validate a compose file.
    pub fn load(path: &Path) -> Result<Self, ComposeError> {
        let content = fs::read_to_string(path).map_err(|source| ComposeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse compose content originating from `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ComposeError> {
        let root: Value = serde_yaml::from_str(content)
            .map_err(|e| ComposeError::Parse(e.to_string()))?;

        let services_value = root
            .get("services")
            .ok_or_else(|| ComposeError::Parse("missing top-level `services:` mapping".to_string()))?;
        let mapping = services_value
            .as_mapping()
            .ok_or_else(|| ComposeError::Parse("`services:` is not a mapping".to_string()))?;

        let mut order = Vec::with_capacity(mapping.len());
        let mut services = HashMap::with_capacity(mapping.len());
        for (name, body) in mapping {
            let name = name
                .as_str()
                .ok_or_else(|| ComposeError::Parse(format!("non-string service name {name:?}")))?
                .to_string();
            let spec = parse_service(&name, body)?;
            order.push(name.clone());
            services.insert(name, spec);
        }

        // depends_on entries must refer to declared services
        for name in &order {
            for dep in &services[name].depends_on {
                if !services.contains_key(dep) {
                    return Err(ComposeError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(Self {
            project: project_name(path),
            path: path.to_path_buf(),
            order,
            services,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compose project name derived from the file's directory.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Service names in document order.
    pub fn service_names(&self) -> &[String] {
        &self.order
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ServiceSpec, ComposeError> {
        self.services
            .get(name)
            .ok_or_else(|| ComposeError::ServiceNotFound(name.to_string()))
    }
}

fn parse_service(name: &str, body: &Value) -> Result<ServiceSpec, ComposeError> {
    let mut spec = ServiceSpec::default();
    let Some(body) = body.as_mapping() else {
        return Err(ComposeError::Parse(format!("service {name} is not a mapping")));
    };

    if let Some(image) = body.get("image") {
        let image = image
            .as_str()
            .ok_or_else(|| ComposeError::Parse(format!("service {name}: image is not a string")))?;
        spec.image = Some(image.to_string());
    }
    if let Some(scale) = body.get("scale") {
        spec.scale = scale.as_u64().map(|n| n as u32);
    }
    if let Some(replicas) = body.get("deploy").and_then(|d| d.get("replicas")) {
        spec.replicas = replicas.as_u64().map(|n| n as u32);
    }
    if let Some(depends) = body.get("depends_on") {
        spec.depends_on = parse_depends_on(name, depends)?;
    }
    if let Some(env) = body.get("environment") {
        spec.environment = parse_environment(name, env)?;
    }
    Ok(spec)
}

/// `depends_on` comes as a plain list or as the long mapping form with
/// per-dependency conditions; only the names matter here.
fn parse_depends_on(service: &str, value: &Value) -> Result<Vec<String>, ComposeError> {
    match value {
        Value::Sequence(entries) => entries
            .iter()
            .map(|entry| {
                entry.as_str().map(str::to_string).ok_or_else(|| {
                    ComposeError::Parse(format!("service {service}: non-string depends_on entry"))
                })
            })
            .collect(),
        Value::Mapping(entries) => entries
            .iter()
            .map(|(dep, _condition)| {
                dep.as_str().map(str::to_string).ok_or_else(|| {
                    ComposeError::Parse(format!("service {service}: non-string depends_on key"))
                })
            })
            .collect(),
        _ => Err(ComposeError::Parse(format!(
            "service {service}: depends_on must be a list or mapping"
        ))),
    }
}

fn parse_environment(service: &str, value: &Value) -> Result<BTreeMap<String, String>, ComposeError> {
    let mut env = BTreeMap::new();
    match value {
        Value::Sequence(entries) => {
            for entry in entries {
                let entry = entry.as_str().ok_or_else(|| {
                    ComposeError::Parse(format!("service {service}: non-string environment entry"))
                })?;
                match entry.split_once('=') {
                    Some((key, val)) => env.insert(key.to_string(), val.to_string()),
                    None => env.insert(entry.to_string(), String::new()),
                };
            }
        }
        Value::Mapping(entries) => {
            for (key, val) in entries {
                let key = key.as_str().ok_or_else(|| {
                    ComposeError::Parse(format!("service {service}: non-string environment key"))
                })?;
                let val = match val {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    other => {
                        return Err(ComposeError::Parse(format!(
                            "service {service}: unsupported environment value {other:?}"
                        )))
                    }
                };
                env.insert(key.to_string(), val);
            }
        }
        _ => {
            return Err(ComposeError::Parse(format!(
                "service {service}: environment must be a list or mapping"
            )))
        }
    }
    Ok(env)
}

/// Search `dir` for a compose file by the standard names, in preference
/// order. Non-standard names are not considered.
pub fn locate_compose_file(dir: &Path) -> Result<PathBuf, ComposeError> {
    for name in STANDARD_NAMES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(ComposeError::FileNotFound(dir.display().to_string()))
}

/// Compose project name: the containing directory's name, lowercased, with
/// characters outside `[a-z0-9_-]` dropped. Matches the engine's default.
pub fn project_name(path: &Path) -> String {
    let dir = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or("default");
    let name: String = dir
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

/// Split an image reference into (repository, tag). Only a `:` after the
/// last `/` counts as a tag separator, so registry ports are not mistaken
/// for tags.
pub fn split_image_tag(image: &str) -> (&str, Option<&str>) {
    let slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[slash..].rfind(':') {
        Some(colon) => {
            let at = slash + colon;
            (&image[..at], Some(&image[at + 1..]))
        }
        None => (image, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
services:
  web:
    image: registry.local:5000/acme/web:v1
    scale: 3
    depends_on:
      - api
    environment:
      - RUST_LOG=info
      - PLAIN
  api:
    image: acme/api:v2
    deploy:
      replicas: 2
    depends_on:
      db:
        condition: service_healthy
    environment:
      PORT: 8080
      DEBUG: true
  db:
    image: postgres
"#;

    #[test]
    fn test_parse_services_in_order() {
        let model = ComposeModel::parse(SAMPLE, Path::new("/tmp/app/docker-compose.yml")).unwrap();
        assert_eq!(model.service_names(), ["web", "api", "db"]);
        assert_eq!(model.project(), "app");
    }

    #[test]
    fn test_service_fields() {
        let model = ComposeModel::parse(SAMPLE, Path::new("/tmp/app/docker-compose.yml")).unwrap();

        let web = model.service("web").unwrap();
        assert_eq!(web.image.as_deref(), Some("registry.local:5000/acme/web:v1"));
        assert_eq!(web.image_tag(), Some("v1"));
        assert_eq!(web.replica_hint(), Some(3));
        assert_eq!(web.depends_on, ["api"]);
        assert_eq!(web.environment.get("RUST_LOG").unwrap(), "info");
        assert_eq!(web.environment.get("PLAIN").unwrap(), "");

        let api = model.service("api").unwrap();
        assert_eq!(api.replica_hint(), Some(2));
        assert_eq!(api.depends_on, ["db"]);
        assert_eq!(api.environment.get("PORT").unwrap(), "8080");

        let db = model.service("db").unwrap();
        assert_eq!(db.image_tag(), None);
        assert_eq!(db.replica_hint(), None);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let content = "services:\n  web:\n    image: web:v1\n    depends_on: [missing]\n";
        let err = ComposeModel::parse(content, Path::new("docker-compose.yml")).unwrap_err();
        assert!(matches!(err, ComposeError::UnknownDependency { .. }));
    }

    #[test]
    fn test_missing_services_mapping() {
        let err = ComposeModel::parse("version: '3'\n", Path::new("c.yml")).unwrap_err();
        assert!(matches!(err, ComposeError::Parse(_)));
    }

    #[test]
    fn test_split_image_tag() {
        assert_eq!(split_image_tag("nginx"), ("nginx", None));
        assert_eq!(split_image_tag("nginx:1.25"), ("nginx", Some("1.25")));
        assert_eq!(
            split_image_tag("registry.local:5000/acme/web"),
            ("registry.local:5000/acme/web", None)
        );
        assert_eq!(
            split_image_tag("registry.local:5000/acme/web:v1"),
            ("registry.local:5000/acme/web", Some("v1"))
        );
    }

    #[test]
    fn test_locate_compose_file_preference() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("compose.yml"), "services: {}\n").unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        let found = locate_compose_file(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "docker-compose.yml");
    }

    #[test]
    fn test_locate_compose_file_ignores_nonstandard_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stack.yml"), "services: {}\n").unwrap();
        assert!(matches!(
            locate_compose_file(dir.path()),
            Err(ComposeError::FileNotFound(_))
        ));
    }
}
