//! In-memory per-session approval cache.
//!
//! Allow-once decisions are remembered for the lifetime of a session so a
//! user is not re-prompted for every file under a directory they already
//! cleared. Nothing here is persisted; restarting the process forgets all
//! of it. File approvals are cached as glob patterns (matched with the
//! grant-store semantics), browser approvals as a plain per-group flag.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::glob;
use crate::store::now_ms;
use crate::types::ToolGroup;

const MAX_SESSIONS: usize = 500;
const MAX_AGE_MS: i64 = 6 * 60 * 60 * 1000;

#[derive(Debug)]
struct SessionEntry {
    updated_at_ms: i64,
    fs_read: HashSet<String>,
    fs_write: HashSet<String>,
    browser_read: bool,
    browser_control: bool,
}

impl SessionEntry {
    fn new(now: i64) -> Self {
        Self {
            updated_at_ms: now,
            fs_read: HashSet::new(),
            fs_write: HashSet::new(),
            browser_read: false,
            browser_control: false,
        }
    }
}

/// Bounded cache of session-scoped approvals with a sliding TTL.
///
/// Every lookup or record touch refreshes the session's timestamp; stale
/// sessions expire after six hours, and the cache holds at most 500
/// sessions, evicting the least recently touched first.
#[derive(Debug, Default)]
pub struct SessionApprovals {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this session already approved `tool_group` (for file groups,
    /// approved a pattern covering `target`).
    pub fn has_approval(
        &self,
        session_key: Option<&str>,
        tool_group: ToolGroup,
        target: Option<&str>,
    ) -> bool {
        let Some(key) = non_empty(session_key) else {
            return false;
        };
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = sessions.get_mut(key) else {
            return false;
        };
        entry.updated_at_ms = now_ms();
        match tool_group {
            ToolGroup::BrowserRead => entry.browser_read,
            ToolGroup::BrowserControl => entry.browser_control,
            ToolGroup::FsRead | ToolGroup::FsWrite => {
                let Some(target) = non_empty(target) else {
                    return false;
                };
                let patterns = if tool_group == ToolGroup::FsRead {
                    &entry.fs_read
                } else {
                    &entry.fs_write
                };
                patterns
                    .iter()
                    .any(|pattern| glob::matches_pattern(pattern, target))
            }
        }
    }

    /// Remember an approval for this session. File groups require a target
    /// pattern; calls without one are ignored.
    pub fn record(&self, session_key: Option<&str>, tool_group: ToolGroup, target: Option<&str>) {
        let Some(key) = non_empty(session_key) else {
            return;
        };
        let now = now_ms();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut sessions, now);
        let entry = sessions
            .entry(key.to_string())
            .or_insert_with(|| SessionEntry::new(now));
        entry.updated_at_ms = now;
        match tool_group {
            ToolGroup::BrowserRead => entry.browser_read = true,
            ToolGroup::BrowserControl => entry.browser_control = true,
            ToolGroup::FsRead | ToolGroup::FsWrite => {
                let Some(target) = non_empty(target) else {
                    return;
                };
                if tool_group == ToolGroup::FsRead {
                    entry.fs_read.insert(target.to_string());
                } else {
                    entry.fs_write.insert(target.to_string());
                }
            }
        }
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    #[cfg(test)]
    fn backdate(&self, session_key: &str, updated_at_ms: i64) {
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(session_key) {
            entry.updated_at_ms = updated_at_ms;
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn prune(sessions: &mut HashMap<String, SessionEntry>, now: i64) {
    sessions.retain(|_, entry| now - entry.updated_at_ms <= MAX_AGE_MS);
    if sessions.len() <= MAX_SESSIONS {
        return;
    }
    let mut ordered: Vec<(String, i64)> = sessions
        .iter()
        .map(|(key, entry)| (key.clone(), entry.updated_at_ms))
        .collect();
    ordered.sort_by_key(|(_, updated)| *updated);
    let excess = sessions.len() - MAX_SESSIONS;
    for (key, _) in ordered.into_iter().take(excess) {
        sessions.remove(&key);
    }
}
