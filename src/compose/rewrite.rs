//! In-place image tag rewrite
//!
//! The live compose file is rewritten line by line instead of being
//! round-tripped through a YAML document, so comments, key order and
//! formatting survive. Only the target service's `image:` line changes;
//! every other line is copied through byte for byte.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use regex::Regex;

use crate::compose::split_image_tag;
use crate::error::ComposeError;

/// Name of the quick-restore copy written next to the live file before
/// every rewrite.
pub const IN_PLACE_BACKUP: &str = "docker-compose.backup.yml";

/// Rewrite the image tag of `service` in the compose file at `path`.
///
/// The original content is first copied to [`IN_PLACE_BACKUP`] in the same
/// directory, then the rewritten content replaces the live file through a
/// temporary file and rename.
pub fn set_image_tag(path: &Path, service: &str, new_tag: &str) -> Result<(), ComposeError> {
    let content = fs::read_to_string(path).map_err(|source| ComposeError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let rewritten = rewrite_content(&content, service, new_tag)?;

    let backup = path.with_file_name(IN_PLACE_BACKUP);
    fs::write(&backup, &content).map_err(|source| ComposeError::Write {
        path: backup.display().to_string(),
        source,
    })?;

    write_atomic(path, rewritten.as_bytes())
}

/// Restore the live file from [`IN_PLACE_BACKUP`] if one exists.
///
/// Returns true when a backup was found and copied back.
pub fn restore_in_place_backup(path: &Path) -> Result<bool, ComposeError> {
    let backup = path.with_file_name(IN_PLACE_BACKUP);
    if !backup.is_file() {
        return Ok(false);
    }
    let content = fs::read(&backup).map_err(|source| ComposeError::Read {
        path: backup.display().to_string(),
        source,
    })?;
    write_atomic(path, &content)?;
    Ok(true)
}

/// Pure rewrite of the compose content. Exposed for the rewrite-invariant
/// tests.
pub fn rewrite_content(
    content: &str,
    service: &str,
    new_tag: &str,
) -> Result<String, ComposeError> {
    let header = Regex::new(r"^( *)([A-Za-z0-9][A-Za-z0-9_.-]*):\s*(#.*)?$")
        .expect("static regex");
    let image = Regex::new(r"^( *image:\s*)(\S+)(.*)$").expect("static regex");

    let mut out = String::with_capacity(content.len() + 16);
    let mut in_services = false;
    let mut service_indent: Option<usize> = None;
    let mut current: Option<String> = None;
    let mut saw_service = false;
    let mut replaced = false;

    for line in content.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\n', '\r']);

        if let Some(caps) = header.captures(stripped) {
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            let name = caps.get(2).map_or("", |m| m.as_str());

            if indent == 0 {
                in_services = name == "services";
                current = None;
            } else if in_services {
                match service_indent {
                    None => {
                        service_indent = Some(indent);
                        current = Some(name.to_string());
                    }
                    Some(level) if indent == level => current = Some(name.to_string()),
                    // deeper headers are nested keys of the current service
                    Some(_) => {}
                }
                if current.as_deref() == Some(service) {
                    saw_service = true;
                }
            }
            out.push_str(line);
            continue;
        }

        if !replaced && in_services && current.as_deref() == Some(service) {
            if let Some(caps) = image.captures(stripped) {
                let prefix = caps.get(1).map_or("", |m| m.as_str());
                let reference = caps.get(2).map_or("", |m| m.as_str());
                let rest = caps.get(3).map_or("", |m| m.as_str());

                out.push_str(prefix);
                out.push_str(&retag(reference, new_tag));
                out.push_str(rest);
                if line.ends_with("\r\n") {
                    out.push_str("\r\n");
                } else if line.ends_with('\n') {
                    out.push('\n');
                }
                replaced = true;
                continue;
            }
        }

        out.push_str(line);
    }

    if !saw_service {
        return Err(ComposeError::ServiceNotFound(service.to_string()));
    }
    if !replaced {
        return Err(ComposeError::ImageLineNotFound(service.to_string()));
    }
    Ok(out)
}

/// Replace the tag suffix of an image reference, preserving any
/// surrounding quotes.
fn retag(reference: &str, new_tag: &str) -> String {
    let (quote, inner) = match reference.as_bytes().first() {
        Some(b'"') => ("\"", reference.trim_matches('"')),
        Some(b'\'') => ("'", reference.trim_matches('\'')),
        _ => ("", reference),
    };
    let (repository, _old_tag) = split_image_tag(inner);
    format!("{quote}{repository}:{new_tag}{quote}")
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ComposeError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("compose.yml");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|source| ComposeError::Write {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# edited by hand\nservices:\n  web:\n    image: acme/web:v1  # pinned\n    ports:\n      - \"8080:80\"\n  api:\n    image: acme/api:v1\n    deploy:\n      replicas: 2\nvolumes:\n  data: {}\n";

    #[test]
    fn test_rewrites_only_the_target_image_line() {
        let out = rewrite_content(SAMPLE, "api", "v2").unwrap();
        let before: Vec<&str> = SAMPLE.lines().collect();
        let after: Vec<&str> = out.lines().collect();
        assert_eq!(before.len(), after.len());
        for (old, new) in before.iter().zip(&after) {
            if old.contains("acme/api") {
                assert_eq!(*new, "    image: acme/api:v2");
            } else {
                assert_eq!(old, new, "untouched line changed");
            }
        }
    }

    #[test]
    fn test_comment_on_image_line_survives() {
        let out = rewrite_content(SAMPLE, "web", "v9").unwrap();
        assert!(out.contains("    image: acme/web:v9  # pinned\n"));
    }

    #[test]
    fn test_untagged_image_gains_a_tag() {
        let content = "services:\n  db:\n    image: postgres\n";
        let out = rewrite_content(content, "db", "16").unwrap();
        assert!(out.contains("image: postgres:16\n"));
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let content = "services:\n  web:\n    image: registry.local:5000/acme/web\n";
        let out = rewrite_content(content, "web", "v2").unwrap();
        assert!(out.contains("image: registry.local:5000/acme/web:v2\n"));
    }

    #[test]
    fn test_quoted_image_reference() {
        let content = "services:\n  web:\n    image: \"acme/web:v1\"\n";
        let out = rewrite_content(content, "web", "v2").unwrap();
        assert!(out.contains("image: \"acme/web:v2\"\n"));
    }

    #[test]
    fn test_unknown_service() {
        assert!(matches!(
            rewrite_content(SAMPLE, "ghost", "v2"),
            Err(ComposeError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_service_without_image_line() {
        let content = "services:\n  worker:\n    build: .\n";
        assert!(matches!(
            rewrite_content(content, "worker", "v2"),
            Err(ComposeError::ImageLineNotFound(_))
        ));
    }

    #[test]
    fn test_top_level_key_after_services_ends_scan() {
        // the volumes mapping must never be treated as a service
        let out = rewrite_content(SAMPLE, "web", "v3").unwrap();
        assert!(out.contains("  data: {}\n"));
    }

    #[test]
    fn test_rewrite_preserves_the_service_graph() {
        use crate::compose::ComposeModel;
        use std::path::Path;

        let path = Path::new("/tmp/app/docker-compose.yml");
        let before = ComposeModel::parse(SAMPLE, path).unwrap();
        let out = rewrite_content(SAMPLE, "api", "v2").unwrap();
        let after = ComposeModel::parse(&out, path).unwrap();

        assert_eq!(before.service_names(), after.service_names());
        for name in before.service_names() {
            let old = before.service(name).unwrap();
            let new = after.service(name).unwrap();
            assert_eq!(old.depends_on, new.depends_on);
            if name == "api" {
                assert_eq!(new.image_tag(), Some("v2"));
            } else {
                assert_eq!(old.image, new.image);
            }
        }
    }

    #[test]
    fn test_set_image_tag_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, SAMPLE).unwrap();

        set_image_tag(&path, "web", "v2").unwrap();

        let backup = dir.path().join(IN_PLACE_BACKUP);
        assert_eq!(fs::read_to_string(backup).unwrap(), SAMPLE);
        assert!(fs::read_to_string(&path).unwrap().contains("acme/web:v2"));
    }

    #[test]
    fn test_restore_in_place_backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, SAMPLE).unwrap();

        set_image_tag(&path, "web", "v2").unwrap();
        assert!(restore_in_place_backup(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn test_restore_without_backup_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, SAMPLE).unwrap();
        assert!(!restore_in_place_backup(&path).unwrap());
    }
}
