//! Vault error types.
//!
//! All vault subsystems surface errors through [`VaultError`], which is the
//! single error type returned by every public API in this crate. Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings. Error text never includes secret
//! material.

/// Unified error type for the Kestrel secret vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. ring internal error, CSPRNG failure).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// The stored ciphertext is not the expected `nonce:tag:ciphertext`
    /// base64 triple.
    #[error("invalid storage ciphertext format")]
    InvalidCiphertextFormat,

    /// The AEAD tag check failed: wrong install id, wrong device, or
    /// tampered ciphertext.
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,

    /// Key derivation failed (invalid scrypt parameters or output length).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    /// No device-bound identifier could be resolved on this host.
    #[error("device id unavailable: {reason}")]
    DeviceIdUnavailable { reason: String },

    // -- Install identity ---------------------------------------------------
    /// The install identity file could not be persisted.
    #[error("failed to persist install id: {reason}")]
    InstallIdPersistFailed { reason: String },

    // -- Backend errors -----------------------------------------------------
    /// The requested secret does not exist in the backend.
    #[error("secret not found: service={service}, account={account}")]
    SecretNotFound { service: String, account: String },

    /// The platform secret store rejected or failed the operation.
    #[error("secret store backend failed: {reason}")]
    BackendFailed { reason: String },

    /// No native secret store exists for this platform and no alternate
    /// backend was configured.
    #[error("no secret store backend for this platform: {platform}")]
    UnsupportedPlatform { platform: String },

    // -- Underlying errors --------------------------------------------------
    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
