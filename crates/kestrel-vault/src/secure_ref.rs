//! Secure references: opaque pointers into the vault.
//!
//! A structured configuration store (the provider credential file) must never
//! hold plaintext secrets. Instead each secret field holds a reference of the
//! form `secure:<account>`; the real value lives encrypted in the vault under
//! that account. Resolution is transparent and backward compatible: a value
//! that is not a reference is returned unchanged, so stores written before
//! migration keep working.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vault::SecretVault;

/// Prefix marking a vault reference inside structured configuration.
pub const SECURE_REF_PREFIX: &str = "secure:";

/// Whether `value` is a secure reference.
pub fn is_secure_ref(value: &str) -> bool {
    value.starts_with(SECURE_REF_PREFIX)
}

/// Extract the vault account from a secure reference, if `value` is one with
/// a non-empty account.
pub fn parse_secure_ref(value: &str) -> Option<&str> {
    let account = value.strip_prefix(SECURE_REF_PREFIX)?.trim();
    if account.is_empty() { None } else { Some(account) }
}

/// Render the reference string for a vault account.
pub fn format_secure_ref(account: &str) -> String {
    format!("{SECURE_REF_PREFIX}{account}")
}

/// Resolve a credential field value.
///
/// If `value` is a secure reference, reads and decrypts the secret from the
/// vault; otherwise returns `value` unchanged (legacy plaintext fallback).
pub fn resolve_secret(vault: &SecretVault, value: &str) -> Result<String> {
    match parse_secure_ref(value) {
        Some(account) => vault.read_secret(account),
        None => Ok(value.to_string()),
    }
}

/// Encrypt and store `secret` under `account`, returning the reference
/// string that replaces the plaintext field.
pub fn store_secret(vault: &SecretVault, account: &str, secret: &str) -> Result<String> {
    vault.write_secret(account, secret)?;
    Ok(format_secure_ref(account))
}

// ---------------------------------------------------------------------------
// Provider credential model
// ---------------------------------------------------------------------------

/// One provider credential inside the structured store.
///
/// Secret-bearing fields (`key`, `token`, `access`, `refresh`) hold either
/// legacy plaintext or a secure reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderCredential {
    ApiKey {
        provider: String,
        key: String,
    },
    Token {
        provider: String,
        token: String,
    },
    Oauth {
        provider: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh: Option<String>,
    },
}

impl ProviderCredential {
    /// Whether the credential carries a usable secret (plaintext or ref).
    pub fn is_configured(&self) -> bool {
        match self {
            Self::ApiKey { key, .. } => !key.trim().is_empty(),
            Self::Token { token, .. } => !token.trim().is_empty(),
            Self::Oauth {
                access, refresh, ..
            } => {
                access.as_deref().is_some_and(|v| !v.trim().is_empty())
                    && refresh.as_deref().is_some_and(|v| !v.trim().is_empty())
            }
        }
    }
}

/// The structured provider-credential store, keyed by profile id
/// (`<provider>:<label>`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialStore {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProviderCredential>,
}

/// Deterministic vault account for one secret field of one profile.
fn secret_account(profile_id: &str, kind: &str) -> String {
    format!("auth-profile:{profile_id}:{kind}")
}

/// Migrate one credential's plaintext fields into the vault.
///
/// Every non-empty field that is not already a reference is stored under a
/// deterministic account and replaced by the returned reference. Returns
/// whether anything changed; re-running on a migrated credential is a no-op
/// with zero vault writes.
pub fn migrate_credential(
    vault: &SecretVault,
    profile_id: &str,
    credential: &mut ProviderCredential,
) -> Result<bool> {
    match credential {
        ProviderCredential::ApiKey { key, .. } => {
            let raw = key.trim();
            if raw.is_empty() || is_secure_ref(raw) {
                return Ok(false);
            }
            let account = secret_account(profile_id, "api-key");
            *key = store_secret(vault, &account, raw)?;
            Ok(true)
        }
        ProviderCredential::Token { token, .. } => {
            let raw = token.trim();
            if raw.is_empty() || is_secure_ref(raw) {
                return Ok(false);
            }
            let account = secret_account(profile_id, "token");
            *token = store_secret(vault, &account, raw)?;
            Ok(true)
        }
        ProviderCredential::Oauth {
            access, refresh, ..
        } => {
            let mut migrated = false;
            if let Some(value) = access {
                let raw = value.trim();
                if !raw.is_empty() && !is_secure_ref(raw) {
                    let account = secret_account(profile_id, "oauth-access");
                    *value = store_secret(vault, &account, raw)?;
                    migrated = true;
                }
            }
            if let Some(value) = refresh {
                let raw = value.trim();
                if !raw.is_empty() && !is_secure_ref(raw) {
                    let account = secret_account(profile_id, "oauth-refresh");
                    *value = store_secret(vault, &account, raw)?;
                    migrated = true;
                }
            }
            Ok(migrated)
        }
    }
}

/// Migrate every credential in the store. Returns whether any profile was
/// mutated; idempotent across runs.
pub fn migrate_store(vault: &SecretVault, store: &mut CredentialStore) -> Result<bool> {
    let mut mutated = false;
    let profile_ids: Vec<String> = store.profiles.keys().cloned().collect();
    for profile_id in profile_ids {
        if let Some(credential) = store.profiles.get_mut(&profile_id)
            && migrate_credential(vault, &profile_id, credential)?
        {
            mutated = true;
        }
    }
    if mutated {
        tracing::info!("migrated provider credentials into the vault");
    }
    Ok(mutated)
}
