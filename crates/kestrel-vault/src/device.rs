//! Device-bound identifier resolution.
//!
//! Storage crypto keys are derived from an identifier tied to the physical
//! machine, so ciphertext copied to another host cannot be decrypted there.
//! Each platform exposes such an identifier through a different facility:
//!
//! - **Linux**: `/etc/machine-id` (or the dbus copy).
//! - **macOS**: `IOPlatformUUID` from `ioreg`.
//! - **Windows**: `MachineGuid` from the registry.
//!
//! The identifier is resolved at most once per process and cached. Tests and
//! embedders that need a deterministic value construct
//! [`StorageCrypto`](crate::crypto::StorageCrypto) with an explicit device id
//! instead of going through this module.

use std::sync::OnceLock;

use crate::error::{Result, VaultError};

static CACHED_DEVICE_ID: OnceLock<Result<String>> = OnceLock::new();

/// Resolve the device-bound identifier for this host, caching the result for
/// the lifetime of the process.
///
/// # Errors
///
/// Returns [`VaultError::DeviceIdUnavailable`] if no platform facility
/// yielded an identifier.
pub fn resolve_platform_device_id() -> Result<String> {
    let cached = CACHED_DEVICE_ID.get_or_init(resolve_uncached);
    match cached {
        Ok(id) => Ok(id.clone()),
        Err(VaultError::DeviceIdUnavailable { reason }) => {
            Err(VaultError::DeviceIdUnavailable {
                reason: reason.clone(),
            })
        }
        // resolve_uncached only produces DeviceIdUnavailable.
        Err(_) => Err(VaultError::DeviceIdUnavailable {
            reason: "device id resolution failed".to_string(),
        }),
    }
}

fn resolve_uncached() -> Result<String> {
    #[cfg(target_os = "linux")]
    let resolved = read_linux_machine_id();
    #[cfg(target_os = "macos")]
    let resolved = read_mac_machine_id();
    #[cfg(target_os = "windows")]
    let resolved = read_windows_machine_id();
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let resolved: Option<String> = None;

    match resolved {
        Some(id) => {
            tracing::debug!("resolved device id");
            Ok(id)
        }
        None => Err(VaultError::DeviceIdUnavailable {
            reason: "no machine id facility responded on this platform".to_string(),
        }),
    }
}

#[cfg(target_os = "linux")]
fn read_linux_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(raw) = std::fs::read_to_string(path) {
            let value = raw.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn read_mac_machine_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let re = regex::Regex::new(r#""IOPlatformUUID"\s*=\s*"([^"]+)""#).ok()?;
    let uuid = re.captures(&stdout)?.get(1)?.as_str().trim().to_string();
    if uuid.is_empty() { None } else { Some(uuid) }
}

#[cfg(target_os = "windows")]
fn read_windows_machine_id() -> Option<String> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let re = regex::Regex::new(r"(?i)MachineGuid\s+REG_SZ\s+(\S+)").ok()?;
    let guid = re.captures(&stdout)?.get(1)?.as_str().trim().to_string();
    if guid.is_empty() { None } else { Some(guid) }
}
