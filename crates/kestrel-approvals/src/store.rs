//! Persisted allow-always grants.
//!
//! Grants live in a single JSON file (`tool-approvals.json`) owned by the
//! user, not the agent. Loading is lenient: a missing, unreadable, or
//! malformed file degrades to an empty grant list, and individually
//! malformed entries are dropped while the rest survive. Writes are
//! strict 0600 and guarded by an optimistic-concurrency hash so two
//! frontends editing the file concurrently cannot silently clobber each
//! other.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApprovalError, Result};
use crate::glob;
use crate::types::ToolGroup;

const GRANT_FILE_VERSION: u32 = 1;

/// One persisted allow-always grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantEntry {
    /// Missing in hand-edited files; normalization mints one.
    #[serde(default)]
    pub id: String,
    pub tool_group: ToolGroup,
    pub pattern: String,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_example: Option<String>,
}

/// The on-disk grant file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantFile {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<GrantEntry>,
}

impl Default for GrantFile {
    fn default() -> Self {
        Self {
            version: GRANT_FILE_VERSION,
            entries: Vec::new(),
        }
    }
}

impl GrantFile {
    /// First grant whose group matches and whose pattern covers `target`.
    pub fn find_match(&self, tool_group: ToolGroup, target: &str) -> Option<&GrantEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.tool_group == tool_group)
            .find(|entry| glob::matches_pattern(&entry.pattern, target))
    }

    /// Stamp usage metadata on the entry with `entry_id`.
    pub fn record_use(&mut self, entry_id: &str, last_example: Option<&str>) {
        let now = now_ms();
        for entry in &mut self.entries {
            if entry.id == entry_id {
                entry.last_used_at_ms = Some(now);
                if let Some(example) = last_example {
                    entry.last_example = Some(example.to_string());
                }
            }
        }
    }

    /// Append a grant unless an identical (group, pattern) pair exists.
    /// Returns whether the file changed.
    pub fn add_entry(
        &mut self,
        tool_group: ToolGroup,
        pattern: &str,
        last_example: Option<&str>,
    ) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        if self
            .entries
            .iter()
            .any(|entry| entry.tool_group == tool_group && entry.pattern == pattern)
        {
            return false;
        }
        let created_at_ms = now_ms();
        self.entries.push(GrantEntry {
            id: Uuid::new_v4().to_string(),
            tool_group,
            pattern: pattern.to_string(),
            created_at_ms,
            last_used_at_ms: Some(created_at_ms),
            last_example: last_example.map(str::to_string),
        });
        true
    }
}

/// A point-in-time view of the grant file, pinned by a content hash.
///
/// The hash is over the exact raw bytes on disk (empty string when the
/// file does not exist), so any concurrent edit changes it.
#[derive(Debug, Clone)]
pub struct GrantSnapshot {
    pub exists: bool,
    pub file: GrantFile,
    pub hash: String,
}

/// Accessor for the grant file at a fixed path.
#[derive(Debug, Clone)]
pub struct GrantStore {
    path: PathBuf,
}

impl GrantStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load grants, degrading to an empty file on any read or parse
    /// problem. Corrupt state must never block tool gating.
    pub fn load(&self) -> GrantFile {
        match fs::read_to_string(&self.path) {
            Ok(raw) => parse_grant_file(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => GrantFile::default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "grant file unreadable, treating as empty");
                GrantFile::default()
            }
        }
    }

    /// Load grants together with the concurrency hash of the raw bytes.
    pub fn snapshot(&self) -> GrantSnapshot {
        match fs::read_to_string(&self.path) {
            Ok(raw) => GrantSnapshot {
                exists: true,
                file: parse_grant_file(&raw),
                hash: sha256_hex(raw.as_bytes()),
            },
            Err(_) => GrantSnapshot {
                exists: false,
                file: GrantFile::default(),
                hash: sha256_hex(b""),
            },
        }
    }

    /// Write the grant file with owner-only permissions.
    pub fn save(&self, file: &GrantFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut raw = serde_json::to_string_pretty(file)?;
        raw.push('\n');
        fs::write(&self.path, &raw)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Write the grant file only if the on-disk content still hashes to
    /// `base_hash`. Rejects with [`ApprovalError::StoreConflict`] otherwise.
    pub fn save_if_unchanged(&self, file: &GrantFile, base_hash: &str) -> Result<()> {
        let current = self.snapshot();
        if current.hash != base_hash {
            return Err(ApprovalError::StoreConflict);
        }
        self.save(file)
    }
}

/// Parse raw grant-file JSON, keeping every well-formed entry and
/// discarding the rest.
fn parse_grant_file(raw: &str) -> GrantFile {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        warn!("grant file is not valid JSON, treating as empty");
        return GrantFile::default();
    };
    normalize_grant_file(&value)
}

/// Coerce an arbitrary JSON value into a well-formed grant file, dropping
/// malformed entries and assigning ids where missing. Used both when
/// loading from disk and when accepting a replacement file over RPC.
pub fn normalize_grant_file(value: &serde_json::Value) -> GrantFile {
    if value.get("version").and_then(serde_json::Value::as_u64) != Some(u64::from(GRANT_FILE_VERSION))
    {
        warn!("grant file has unknown version, treating as empty");
        return GrantFile::default();
    }
    let mut file = GrantFile::default();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let raw_entries = match value.get("entries") {
        Some(serde_json::Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
    for item in raw_entries {
        let Ok(mut entry) = serde_json::from_value::<GrantEntry>(item.clone()) else {
            warn!("dropping malformed grant entry");
            continue;
        };
        entry.pattern = entry.pattern.trim().to_string();
        if entry.pattern.is_empty() || entry.created_at_ms <= 0 {
            warn!("dropping grant entry with empty pattern or missing timestamp");
            continue;
        }
        entry.id = entry.id.trim().to_string();
        if entry.id.is_empty() || !seen_ids.insert(entry.id.clone()) {
            entry.id = Uuid::new_v4().to_string();
            seen_ids.insert(entry.id.clone());
        }
        if entry.last_used_at_ms.is_some_and(|ms| ms <= 0) {
            entry.last_used_at_ms = None;
        }
        file.entries.push(entry);
    }
    file
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
    let mut out = String::with_capacity(digest.as_ref().len() * 2);
    for byte in digest.as_ref() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> GrantStore {
        GrantStore::new(dir.path().join("tool-approvals.json"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let file = store.load();
        assert_eq!(file.version, 1);
        assert!(file.entries.is_empty());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut file = GrantFile::default();
        assert!(file.add_entry(ToolGroup::FsRead, "/home/me/**", Some("read notes")));
        store.save(&file).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.entries.len(), 1);
        let entry = &loaded.entries[0];
        assert_eq!(entry.tool_group, ToolGroup::FsRead);
        assert_eq!(entry.pattern, "/home/me/**");
        assert_eq!(entry.last_example.as_deref(), Some("read notes"));
        assert!(entry.last_used_at_ms.is_some());
    }

    #[test]
    fn duplicate_group_pattern_pairs_are_not_added_twice() {
        let mut file = GrantFile::default();
        assert!(file.add_entry(ToolGroup::FsWrite, "/a/**", None));
        assert!(!file.add_entry(ToolGroup::FsWrite, "/a/**", None));
        // Same pattern under a different group is a distinct grant.
        assert!(file.add_entry(ToolGroup::FsRead, "/a/**", None));
        assert_eq!(file.entries.len(), 2);
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool-approvals.json");
        fs::write(
            &path,
            r#"{
              "version": 1,
              "entries": [
                {"id": "a", "toolGroup": "fs.read", "pattern": "/ok/**", "createdAtMs": 5},
                {"id": "b", "toolGroup": "shell.exec", "pattern": "/bad/**", "createdAtMs": 5},
                {"id": "c", "toolGroup": "fs.write", "pattern": "", "createdAtMs": 5},
                "not-an-object"
              ]
            }"#,
        )
        .unwrap();
        let file = GrantStore::new(path).load();
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.entries[0].pattern, "/ok/**");
    }

    #[test]
    fn entries_missing_ids_are_assigned_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool-approvals.json");
        // One entry with a blank id, one with no id field at all. Both are
        // valid grants and must survive with a minted id.
        fs::write(
            &path,
            r#"{"version":1,"entries":[
              {"id":"  ","toolGroup":"fs.read","pattern":"/x/**","createdAtMs":5},
              {"toolGroup":"fs.write","pattern":"/y/**","createdAtMs":5}
            ]}"#,
        )
        .unwrap();
        let file = GrantStore::new(path).load();
        assert_eq!(file.entries.len(), 2);
        for entry in &file.entries {
            assert!(!entry.id.trim().is_empty());
        }
        assert_ne!(file.entries[0].id, file.entries[1].id);
    }

    #[test]
    fn unknown_version_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool-approvals.json");
        fs::write(&path, r#"{"version":2,"entries":[]}"#).unwrap();
        assert!(GrantStore::new(path).load().entries.is_empty());
    }

    #[test]
    fn invalid_json_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool-approvals.json");
        fs::write(&path, "{ definitely not json").unwrap();
        assert!(GrantStore::new(path).load().entries.is_empty());
    }

    #[test]
    fn stale_base_hash_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let before = store.snapshot();

        // Another writer lands first.
        let mut other = GrantFile::default();
        other.add_entry(ToolGroup::FsRead, "/winner/**", None);
        store.save(&other).unwrap();

        let mut mine = GrantFile::default();
        mine.add_entry(ToolGroup::FsRead, "/loser/**", None);
        assert!(matches!(
            store.save_if_unchanged(&mine, &before.hash),
            Err(ApprovalError::StoreConflict)
        ));

        // The winner's write is intact.
        let loaded = store.load();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].pattern, "/winner/**");
    }

    #[test]
    fn fresh_base_hash_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let snapshot = store.snapshot();
        let mut file = snapshot.file;
        file.add_entry(ToolGroup::BrowserRead, "session", None);
        store.save_if_unchanged(&file, &snapshot.hash).unwrap();
        assert_eq!(store.load().entries.len(), 1);
    }

    #[test]
    fn find_match_respects_group_scoping() {
        let mut file = GrantFile::default();
        file.add_entry(ToolGroup::FsRead, "/data/**", None);
        assert!(file.find_match(ToolGroup::FsRead, "/data/a.txt").is_some());
        assert!(file.find_match(ToolGroup::FsWrite, "/data/a.txt").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn grant_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&GrantFile::default()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
