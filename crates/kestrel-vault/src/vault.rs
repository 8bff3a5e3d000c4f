//! Secret Vault façade.
//!
//! [`SecretVault`] composes a [`SecretBackend`](crate::backend::SecretBackend)
//! with [`StorageCrypto`](crate::crypto::StorageCrypto) so that everything the
//! system stores for itself (OAuth tokens, identity records, the gateway
//! rendezvous token) is encrypted before it reaches the platform store and
//! decrypted on the way back. The backend never sees plaintext and the
//! callers never see ciphertext.
//!
//! Raw passthrough methods exist for callers that manage their own encryption
//! (the secure-reference layer encrypts per-field before writing).

use std::sync::Arc;

use crate::backend::SecretBackend;
use crate::crypto::StorageCrypto;
use crate::error::Result;

/// Encrypt-on-write / decrypt-on-read secret storage scoped to one service
/// name and one install.
pub struct SecretVault {
    backend: Arc<dyn SecretBackend>,
    crypto: StorageCrypto,
    install_id: String,
    service: String,
}

impl SecretVault {
    /// Create a vault over the given backend.
    ///
    /// All dependencies are explicit: the backend, the crypto instance (which
    /// carries the device binding), the install id, and the service namespace
    /// used for every `(service, account)` pair.
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        crypto: StorageCrypto,
        install_id: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            crypto,
            install_id: install_id.into(),
            service: service.into(),
        }
    }

    /// The install id this vault encrypts under.
    pub fn install_id(&self) -> &str {
        &self.install_id
    }

    /// The service namespace used for backend entries.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Encrypt `secret` and store it under `account`.
    pub fn write_secret(&self, account: &str, secret: &str) -> Result<()> {
        let ciphertext = self.crypto.encrypt(secret, &self.install_id)?;
        self.backend.write(&self.service, account, &ciphertext)?;
        tracing::debug!(account = account, "stored encrypted secret");
        Ok(())
    }

    /// Read and decrypt the secret stored under `account`.
    ///
    /// # Errors
    ///
    /// [`VaultError::SecretNotFound`](crate::error::VaultError::SecretNotFound)
    /// if the entry is absent;
    /// [`VaultError::AuthenticationFailed`](crate::error::VaultError::AuthenticationFailed)
    /// if it was written by another install or device.
    pub fn read_secret(&self, account: &str) -> Result<String> {
        let ciphertext = self.backend.read(&self.service, account)?;
        self.crypto.decrypt(&ciphertext, &self.install_id)
    }

    /// Delete the entry under `account`. Succeeds if absent.
    pub fn delete_secret(&self, account: &str) -> Result<()> {
        self.backend.delete(&self.service, account)
    }

    /// Store a value exactly as given, without encrypting.
    pub fn write_raw(&self, account: &str, value: &str) -> Result<()> {
        self.backend.write(&self.service, account, value)
    }

    /// Read the stored value exactly as the backend holds it.
    pub fn read_raw(&self, account: &str) -> Result<String> {
        self.backend.read(&self.service, account)
    }
}
