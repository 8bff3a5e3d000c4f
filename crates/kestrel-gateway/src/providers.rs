//! Provider credential management.
//!
//! A fixed catalog of model providers, each with at most one default
//! profile in the on-disk credential store. API keys pass straight through
//! the secure-reference migration, so the store file only ever holds
//! `secure:` pointers and the key material lives in the vault.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kestrel_vault::secure_ref::{self, parse_secure_ref};
use kestrel_vault::{CredentialStore, ProviderCredential, SecretVault};
use serde::Serialize;
use tracing::warn;

use crate::error::{GatewayError, Result};

/// The providers the gateway knows how to configure.
pub const PROVIDER_CATALOG: [(&str, &str); 4] = [
    ("anthropic", "Anthropic (Claude)"),
    ("openai", "OpenAI"),
    ("google", "Google Gemini"),
    ("openrouter", "OpenRouter"),
];

/// One catalog entry plus whether a usable credential exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: String,
    pub label: String,
    pub configured: bool,
}

fn normalize_provider_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn default_profile_id(provider: &str) -> String {
    format!("{provider}:default")
}

/// Credential store file plus the vault its secrets migrate into.
pub struct ProviderRegistry {
    path: PathBuf,
    vault: Arc<SecretVault>,
}

impl ProviderRegistry {
    pub fn new(path: impl Into<PathBuf>, vault: Arc<SecretVault>) -> Self {
        Self {
            path: path.into(),
            vault,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the credential store, degrading to empty on missing or
    /// malformed state.
    pub fn load(&self) -> CredentialStore {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(store) => store,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "credential store unreadable, treating as empty");
                    CredentialStore::default()
                }
            },
            Err(_) => CredentialStore::default(),
        }
    }

    fn save(&self, store: &CredentialStore) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut raw = serde_json::to_string_pretty(store)?;
        raw.push('\n');
        fs::write(&self.path, &raw)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Catalog with per-provider configured flags.
    pub fn list(&self) -> Vec<ProviderStatus> {
        let store = self.load();
        PROVIDER_CATALOG
            .iter()
            .map(|(id, label)| {
                let configured = store
                    .profiles
                    .get(&default_profile_id(id))
                    .is_some_and(ProviderCredential::is_configured);
                ProviderStatus {
                    id: (*id).to_string(),
                    label: (*label).to_string(),
                    configured,
                }
            })
            .collect()
    }

    /// Store an API key for a catalog provider. The plaintext is migrated
    /// into the vault before the store file is written.
    pub fn set_api_key(&self, provider: &str, api_key: &str) -> Result<()> {
        let provider = self.require_known(provider)?;
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(GatewayError::ApiKeyRequired);
        }
        let mut store = self.load();
        let profile_id = default_profile_id(&provider);
        store.profiles.insert(
            profile_id,
            ProviderCredential::ApiKey {
                provider: provider.clone(),
                key: api_key.to_string(),
            },
        );
        secure_ref::migrate_store(&self.vault, &mut store)?;
        self.save(&store)
    }

    /// Remove a provider's credential and the vault secret behind it.
    /// Clearing an unconfigured provider is a no-op.
    pub fn clear_api_key(&self, provider: &str) -> Result<()> {
        let provider = self.require_known(provider)?;
        let mut store = self.load();
        let profile_id = default_profile_id(&provider);
        let Some(removed) = store.profiles.remove(&profile_id) else {
            return Ok(());
        };
        self.save(&store)?;
        if let ProviderCredential::ApiKey { key, .. } = removed {
            let account = parse_secure_ref(&key)
                .map(str::to_string)
                .unwrap_or_else(|| format!("auth-profile:{profile_id}:api-key"));
            self.vault.delete_secret(&account)?;
        }
        Ok(())
    }

    fn require_known(&self, provider: &str) -> Result<String> {
        let normalized = normalize_provider_id(provider);
        if PROVIDER_CATALOG.iter().any(|(id, _)| *id == normalized) {
            Ok(normalized)
        } else {
            Err(GatewayError::UnknownProvider {
                provider: normalized,
            })
        }
    }
}
