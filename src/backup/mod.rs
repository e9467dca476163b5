//! Versioned backup log for compose descriptions
//!
//! Every update snapshots the live compose file into the backup directory
//! as `{service}-{tag}-{YYYYMMDD-HHMMSS}.yml` (local time). Entries are
//! byte-exact copies, parsed back from their filenames, sortable newest
//! first, and pruned beyond `max_history` per service. Restoring first
//! drops a `{live_name}.pre-rollback.{ts}` copy next to the live file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::error::RollbackError;

/// Timestamp layout used in snapshot filenames.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const TIMESTAMP_LEN: usize = 15; // YYYYMMDD-HHMMSS

/// One recorded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackEntry {
    pub service_name: String,
    /// Tag the service carried when the snapshot was taken.
    pub image_tag: String,
    pub timestamp: NaiveDateTime,
    /// Path of the snapshot file itself.
    pub compose_file_path: PathBuf,
}

pub struct BackupLog {
    dir: PathBuf,
    max_history: usize,
}

impl BackupLog {
    pub fn new(dir: impl Into<PathBuf>, max_history: usize) -> Result<Self, RollbackError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| RollbackError::BackupIo(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir, max_history })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a byte-exact copy of the compose file for `service` at
    /// `tag`, then prune history beyond the bound.
    pub fn snapshot(
        &self,
        compose_path: &Path,
        service: &str,
        tag: &str,
    ) -> Result<RollbackEntry, RollbackError> {
        if tag.is_empty() || tag.contains('-') {
            return Err(RollbackError::UnsupportedTag(tag.to_string()));
        }

        let now = Local::now().naive_local();
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        // the entry timestamp is second-granular like the filename
        let timestamp = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).unwrap_or(now);
        let file_name = format!("{service}-{tag}-{stamp}.yml");
        let target = self.dir.join(&file_name);

        let content = fs::read(compose_path)
            .map_err(|e| RollbackError::BackupIo(format!("{}: {e}", compose_path.display())))?;
        write_atomic(&target, &content)
            .map_err(|e| RollbackError::BackupIo(format!("{}: {e}", target.display())))?;
        info!(service, tag, snapshot = %target.display(), "compose snapshot recorded");

        self.prune(service)?;

        Ok(RollbackEntry {
            service_name: service.to_string(),
            image_tag: tag.to_string(),
            timestamp,
            compose_file_path: target,
        })
    }

    /// Snapshots for `service`, newest first.
    pub fn history(&self, service: &str) -> Result<Vec<RollbackEntry>, RollbackError> {
        let mut entries: Vec<RollbackEntry> = Vec::new();
        let read = fs::read_dir(&self.dir)
            .map_err(|e| RollbackError::BackupIo(format!("{}: {e}", self.dir.display())))?;
        for item in read {
            let item = item.map_err(|e| RollbackError::BackupIo(e.to_string()))?;
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(entry) = parse_entry(&self.dir, name) {
                if entry.service_name == service {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.compose_file_path.cmp(&a.compose_file_path))
        });
        Ok(entries)
    }

    /// Most recent snapshot for `service`.
    pub fn latest(&self, service: &str) -> Result<Option<RollbackEntry>, RollbackError> {
        Ok(self.history(service)?.into_iter().next())
    }

    /// Linear scan for the newest snapshot whose tag equals `version`.
    pub fn find_version(
        &self,
        service: &str,
        version: &str,
    ) -> Result<Option<RollbackEntry>, RollbackError> {
        Ok(self
            .history(service)?
            .into_iter()
            .find(|entry| entry.image_tag == version))
    }

    /// Copy `entry` over the live compose file, keeping a pre-rollback
    /// copy of what was live.
    pub fn restore(&self, entry: &RollbackEntry, live_path: &Path) -> Result<(), RollbackError> {
        let live_name = live_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("docker-compose.yml");
        let ts = Local::now().naive_local().format(TIMESTAMP_FORMAT);
        let pre = live_path.with_file_name(format!("{live_name}.pre-rollback.{ts}"));

        if live_path.is_file() {
            fs::copy(live_path, &pre)
                .map_err(|e| RollbackError::RestoreIo(format!("{}: {e}", pre.display())))?;
        }

        let content = fs::read(&entry.compose_file_path).map_err(|e| {
            RollbackError::RestoreIo(format!("{}: {e}", entry.compose_file_path.display()))
        })?;
        write_atomic(live_path, &content)
            .map_err(|e| RollbackError::RestoreIo(format!("{}: {e}", live_path.display())))?;
        info!(
            service = %entry.service_name,
            tag = %entry.image_tag,
            "compose file restored from snapshot"
        );
        Ok(())
    }

    fn prune(&self, service: &str) -> Result<(), RollbackError> {
        let history = self.history(service)?;
        for stale in history.iter().skip(self.max_history) {
            debug!(path = %stale.compose_file_path.display(), "pruning snapshot");
            fs::remove_file(&stale.compose_file_path).map_err(|e| {
                RollbackError::BackupIo(format!("{}: {e}", stale.compose_file_path.display()))
            })?;
        }
        Ok(())
    }
}

/// Parse `{service}-{tag}-{YYYYMMDD-HHMMSS}.yml` back into an entry. The
/// timestamp is fixed-width at the end, and the tag is the last dashed
/// component before it, so service names may contain dashes.
fn parse_entry(dir: &Path, file_name: &str) -> Option<RollbackEntry> {
    let stem = file_name.strip_suffix(".yml")?;
    if stem.len() < TIMESTAMP_LEN + 4 {
        return None;
    }
    let (rest, ts_part) = stem.split_at(stem.len() - TIMESTAMP_LEN);
    let rest = rest.strip_suffix('-')?;
    let timestamp = NaiveDateTime::parse_from_str(ts_part, TIMESTAMP_FORMAT).ok()?;
    let (service, tag) = rest.rsplit_once('-')?;
    if service.is_empty() || tag.is_empty() {
        return None;
    }
    Some(RollbackEntry {
        service_name: service.to_string(),
        image_tag: tag.to_string(),
        timestamp,
        compose_file_path: dir.join(file_name),
    })
}

/// Temp-file write plus rename so readers never see a half-written file.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    let mut file = File::create(&tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}
