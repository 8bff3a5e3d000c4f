//! Per-install identity.
//!
//! Every installation owns a single random UUID, persisted in a small
//! versioned JSON file under the state directory. The id scopes all derived
//! encryption keys, so secrets from two installs never decrypt with each
//! other's key even on the same machine. The id is created lazily on first
//! use and never changes afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

const INSTALL_FILE_NAME: &str = "install.json";
const INSTALL_FILE_VERSION: u32 = 1;

/// On-disk shape of the install identity file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstallFile {
    version: u32,
    #[serde(rename = "installId")]
    install_id: String,
}

/// Resolve the install id for the given state directory, creating it on
/// first use.
///
/// A malformed or unreadable file is treated as absent and regenerated; an
/// existing valid file is immutable. The state directory is created with
/// owner-only permissions, and the file itself is mode 0600 on Unix.
///
/// # Errors
///
/// Returns [`VaultError::InstallIdPersistFailed`] if a fresh id cannot be
/// written to disk.
pub fn resolve_install_id(state_dir: &Path) -> Result<String> {
    let file_path = state_dir.join(INSTALL_FILE_NAME);

    if let Ok(raw) = std::fs::read_to_string(&file_path)
        && let Ok(parsed) = serde_json::from_str::<InstallFile>(&raw)
    {
        let id = parsed.install_id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let install_id = uuid::Uuid::new_v4().to_string();
    let payload = InstallFile {
        version: INSTALL_FILE_VERSION,
        install_id: install_id.clone(),
    };

    let write = || -> std::io::Result<()> {
        std::fs::create_dir_all(state_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(state_dir, std::fs::Permissions::from_mode(0o700))?;
        }
        let body = format!("{}\n", serde_json::to_string_pretty(&payload)?);
        std::fs::write(&file_path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    };
    write().map_err(|err| VaultError::InstallIdPersistFailed {
        reason: err.to_string(),
    })?;

    tracing::info!(path = %file_path.display(), "created install identity");
    Ok(install_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_id_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let id = resolve_install_id(dir.path()).unwrap();
        assert!(!id.is_empty());
        assert!(dir.path().join(INSTALL_FILE_NAME).exists());
    }

    #[test]
    fn id_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = resolve_install_id(dir.path()).unwrap();
        let second = resolve_install_id(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INSTALL_FILE_NAME), "{not json").unwrap();
        let id = resolve_install_id(dir.path()).unwrap();
        assert!(!id.is_empty());

        // The regenerated file parses and matches the returned id.
        let raw = std::fs::read_to_string(dir.path().join(INSTALL_FILE_NAME)).unwrap();
        let parsed: InstallFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.install_id, id);
        assert_eq!(parsed.version, INSTALL_FILE_VERSION);
    }

    #[test]
    fn empty_id_field_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(INSTALL_FILE_NAME),
            r#"{"version":1,"installId":"  "}"#,
        )
        .unwrap();
        let id = resolve_install_id(dir.path()).unwrap();
        assert!(!id.trim().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        resolve_install_id(dir.path()).unwrap();
        let meta = std::fs::metadata(dir.path().join(INSTALL_FILE_NAME)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
