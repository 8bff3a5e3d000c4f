//! Platform secret-store backends.
//!
//! The vault stores `(service, account) → secret` triples in whatever secure
//! facility the host provides:
//!
//! - **macOS**: Keychain Services via `security-framework`.
//! - **Windows**: Credential Manager via a PowerShell CredMan shell-out.
//! - **Tests / headless**: [`MemoryBackend`], selected only by explicit
//!   configuration, never by environment sniffing.
//!
//! Backends store and return opaque bytes; the encryption layer above them
//! ([`crate::crypto`]) is invisible here. Backend calls may shell out to a
//! platform tool and are treated as potentially slow synchronous operations;
//! callers must not hold other locks across them.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, VaultError};

/// Abstraction over platform-specific secret storage.
///
/// Implementations must be `Send + Sync` so the vault can be shared across
/// async tasks. `delete` is idempotent: deleting an absent entry succeeds.
pub trait SecretBackend: Send + Sync {
    /// Read the secret stored under `(service, account)`.
    ///
    /// Returns [`VaultError::SecretNotFound`] when no entry exists.
    fn read(&self, service: &str, account: &str) -> Result<String>;

    /// Store (or overwrite) the secret under `(service, account)`.
    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()>;

    /// Delete the entry under `(service, account)`, succeeding if absent.
    fn delete(&self, service: &str, account: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory backend for tests and explicit opt-in configurations.
///
/// Implements the identical contract as the native backends. It is never
/// selected implicitly: [`platform_backend`] only ever returns a native
/// store.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries (test helper).
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretBackend for MemoryBackend {
    fn read(&self, service: &str, account: &str) -> Result<String> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| VaultError::BackendFailed {
                reason: "memory backend lock poisoned".into(),
            })?;
        entries
            .get(&(service.to_string(), account.to_string()))
            .cloned()
            .ok_or_else(|| VaultError::SecretNotFound {
                service: service.to_string(),
                account: account.to_string(),
            })
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| VaultError::BackendFailed {
                reason: "memory backend lock poisoned".into(),
            })?;
        entries.insert(
            (service.to_string(), account.to_string()),
            secret.to_string(),
        );
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| VaultError::BackendFailed {
                reason: "memory backend lock poisoned".into(),
            })?;
        entries.remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// The Security framework error code for "item not found"
/// (`errSecItemNotFound = -25300`).
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// macOS Keychain Services backend via the `security-framework` crate.
///
/// Uses the generic password APIs; entries are protected by the user's login
/// password and (on Apple Silicon) the Secure Enclave.
#[cfg(target_os = "macos")]
pub struct MacKeychainBackend;

#[cfg(target_os = "macos")]
impl MacKeychainBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "macos")]
impl Default for MacKeychainBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl SecretBackend for MacKeychainBackend {
    fn read(&self, service: &str, account: &str) -> Result<String> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(service, account) {
            Ok(data) => String::from_utf8(data.to_vec()).map_err(|_| VaultError::BackendFailed {
                reason: "keychain entry is not valid utf-8".into(),
            }),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => {
                Err(VaultError::SecretNotFound {
                    service: service.to_string(),
                    account: account.to_string(),
                })
            }
            Err(e) => Err(VaultError::BackendFailed {
                reason: format!("macOS keychain read failed: {e}"),
            }),
        }
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        use security_framework::passwords::set_generic_password;

        set_generic_password(service, account, secret.as_bytes()).map_err(|e| {
            VaultError::BackendFailed {
                reason: format!("macOS keychain write failed: {e}"),
            }
        })?;
        tracing::debug!(service = service, "stored secret in macOS keychain");
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        use security_framework::passwords::delete_generic_password;

        match delete_generic_password(service, account) {
            Ok(()) => Ok(()),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(VaultError::BackendFailed {
                reason: format!("macOS keychain delete failed: {e}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Windows Credential Manager
// ---------------------------------------------------------------------------

/// Windows Credential Manager backend.
///
/// Shells out to PowerShell's CredMan interop for generic credentials; the
/// target name is `kestrel:<service>|<account>`. Each call spawns a process
/// and must be treated as slow.
#[cfg(target_os = "windows")]
pub struct WindowsCredentialBackend;

#[cfg(target_os = "windows")]
impl WindowsCredentialBackend {
    pub fn new() -> Self {
        Self
    }

    fn target(service: &str, account: &str) -> String {
        format!("kestrel:{service}|{account}")
    }

    fn run(script: &str) -> Result<String> {
        let output = std::process::Command::new("powershell.exe")
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .map_err(|e| VaultError::BackendFailed {
                reason: format!("powershell spawn failed: {e}"),
            })?;
        if !output.status.success() {
            return Err(VaultError::BackendFailed {
                reason: format!(
                    "powershell exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(target_os = "windows")]
impl SecretBackend for WindowsCredentialBackend {
    fn read(&self, service: &str, account: &str) -> Result<String> {
        let target = Self::target(service, account);
        let script = format!(
            "$v = [Windows.Security.Credentials.PasswordVault]::new(); \
             try {{ $cred = $v.Retrieve(\"{target}\", \"{account}\"); \
             $cred.RetrievePassword(); Write-Output $cred.Password }} \
             catch {{ Write-Output \"__NOT_FOUND__\" }}"
        );
        let out = Self::run(&script)?;
        if out == "__NOT_FOUND__" || out.is_empty() {
            return Err(VaultError::SecretNotFound {
                service: service.to_string(),
                account: account.to_string(),
            });
        }
        Ok(out)
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<()> {
        let target = Self::target(service, account);
        let secret_b64 = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(secret.as_bytes())
        };
        let script = format!(
            "$v = [Windows.Security.Credentials.PasswordVault]::new(); \
             $s = [Text.Encoding]::UTF8.GetString([Convert]::FromBase64String(\"{secret_b64}\")); \
             $v.Add([Windows.Security.Credentials.PasswordCredential]::new(\"{target}\", \"{account}\", $s))"
        );
        Self::run(&script)?;
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        let target = Self::target(service, account);
        let script = format!(
            "$v = [Windows.Security.Credentials.PasswordVault]::new(); \
             try {{ $cred = $v.Retrieve(\"{target}\", \"{account}\"); $v.Remove($cred) }} catch {{}}"
        );
        Self::run(&script)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Return the native secret-store backend for this platform.
///
/// # Errors
///
/// Returns [`VaultError::UnsupportedPlatform`] on platforms without a native
/// store. The in-memory backend is never substituted automatically; callers
/// wanting it must construct [`MemoryBackend`] explicitly.
pub fn platform_backend() -> Result<Box<dyn SecretBackend>> {
    #[cfg(target_os = "macos")]
    {
        tracing::info!("using macOS Keychain Services secret store");
        Ok(Box::new(MacKeychainBackend::new()))
    }
    #[cfg(target_os = "windows")]
    {
        tracing::info!("using Windows Credential Manager secret store");
        Ok(Box::new(WindowsCredentialBackend::new()))
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Err(VaultError::UnsupportedPlatform {
            platform: std::env::consts::OS.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        backend.write("svc", "acct", "s3cret").unwrap();
        assert_eq!(backend.read("svc", "acct").unwrap(), "s3cret");
    }

    #[test]
    fn memory_backend_read_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let result = backend.read("svc", "nope");
        assert!(matches!(result, Err(VaultError::SecretNotFound { .. })));
    }

    #[test]
    fn memory_backend_overwrite() {
        let backend = MemoryBackend::new();
        backend.write("svc", "acct", "first").unwrap();
        backend.write("svc", "acct", "second").unwrap();
        assert_eq!(backend.read("svc", "acct").unwrap(), "second");
    }

    #[test]
    fn memory_backend_delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.write("svc", "acct", "s").unwrap();
        backend.delete("svc", "acct").unwrap();
        backend.delete("svc", "acct").unwrap();
        assert!(backend.read("svc", "acct").is_err());
    }

    #[test]
    fn memory_backend_keys_are_scoped_by_service_and_account() {
        let backend = MemoryBackend::new();
        backend.write("svc-a", "acct", "one").unwrap();
        backend.write("svc-b", "acct", "two").unwrap();
        backend.write("svc-a", "other", "three").unwrap();
        assert_eq!(backend.read("svc-a", "acct").unwrap(), "one");
        assert_eq!(backend.read("svc-b", "acct").unwrap(), "two");
        assert_eq!(backend.read("svc-a", "other").unwrap(), "three");
    }

    #[test]
    fn backend_trait_object_is_usable() {
        let backend: Box<dyn SecretBackend> = Box::new(MemoryBackend::new());
        backend.write("svc", "acct", "x").unwrap();
        assert_eq!(backend.read("svc", "acct").unwrap(), "x");
    }
}
