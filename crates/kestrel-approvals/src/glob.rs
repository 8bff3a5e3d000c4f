//! Path pattern matching for persisted grants.
//!
//! Grant patterns are a small glob dialect over canonical absolute paths:
//! `*` matches within one path segment, `**` crosses segment boundaries,
//! `?` matches a single character, and everything else is literal. Matching
//! is case-insensitive and separator-normalized so that a grant written on
//! one invocation keeps matching targets spelled with `\` or mixed case.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use regex::RegexBuilder;

/// Expand a leading `~` or `~/` to the current user's home directory.
///
/// Values without a tilde prefix pass through untouched, as do tilde values
/// when no home directory can be resolved.
pub fn expand_home(value: &str) -> String {
    if value == "~" {
        if let Some(home) = home_dir() {
            return home.to_string_lossy().into_owned();
        }
        return value.to_string();
    }
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().into_owned();
    }
    value.to_string()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let var = std::env::var_os("USERPROFILE");
    #[cfg(not(windows))]
    let var = std::env::var_os("HOME");
    var.filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Fold a path into the comparison form used on both sides of a match:
/// verbatim/UNC prefixes stripped, backslashes rewritten to `/`, lowercased.
fn normalize_match_target(value: &str) -> String {
    let stripped = value
        .strip_prefix("\\\\?\\")
        .or_else(|| value.strip_prefix("\\\\.\\"))
        .unwrap_or(value);
    stripped.replace('\\', "/").to_lowercase()
}

fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    source.push_str(".*");
                } else {
                    source.push_str("[^/]*");
                }
            }
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    RegexBuilder::new(&source).case_insensitive(true).build().ok()
}

/// Whether a grant `pattern` covers a canonical `target` path.
///
/// Empty patterns never match. Tilde patterns expand against the home
/// directory at match time, so grants written as `~/projects/**` keep
/// working if the underlying home path changes spelling.
pub fn matches_pattern(pattern: &str, target: &str) -> bool {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return false;
    }
    let expanded = if trimmed.starts_with('~') {
        expand_home(trimmed)
    } else {
        trimmed.to_string()
    };

    // Windows pattern files frequently hold pre-symlink paths; resolve both
    // sides when the pattern has no wildcards left to preserve.
    #[cfg(windows)]
    let (expanded, target) = {
        let has_wildcard = expanded.contains(['*', '?']);
        if has_wildcard {
            (expanded, target.to_string())
        } else {
            (
                try_realpath(&expanded).unwrap_or(expanded),
                try_realpath(target).unwrap_or_else(|| target.to_string()),
            )
        }
    };
    #[cfg(windows)]
    let target = target.as_str();

    let normalized_pattern = normalize_match_target(&expanded);
    let normalized_target = normalize_match_target(target);
    match glob_to_regex(&normalized_pattern) {
        Some(regex) => regex.is_match(&normalized_target),
        None => false,
    }
}

#[cfg(windows)]
fn try_realpath(value: &str) -> Option<String> {
    std::fs::canonicalize(value)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// The recursive directory glob for a file's parent, used when broadening
/// a single-file approval into a reusable grant.
pub fn dir_glob(file_path: &str) -> String {
    let trimmed = file_path.trim();
    let resolved = if trimmed.starts_with('~') {
        expand_home(trimmed)
    } else {
        trimmed.to_string()
    };
    let dir = Path::new(&resolved)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or(resolved);
    if dir.ends_with(MAIN_SEPARATOR) {
        format!("{dir}**")
    } else {
        format!("{dir}{MAIN_SEPARATOR}**")
    }
}

/// The recursive glob rooted at a directory (sandbox root broadening).
pub fn root_glob(root: &str) -> String {
    let trimmed = root.trim();
    let resolved = if trimmed.starts_with('~') {
        expand_home(trimmed)
    } else {
        trimmed.to_string()
    };
    if resolved.ends_with(MAIN_SEPARATOR) {
        format!("{resolved}**")
    } else {
        format!("{resolved}{MAIN_SEPARATOR}**")
    }
}
