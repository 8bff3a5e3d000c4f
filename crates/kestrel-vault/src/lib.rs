//! Encrypted secret vault for Kestrel.
//!
//! This crate is the confidentiality layer of the Kestrel trust boundary:
//! secrets (API keys, OAuth tokens, identity records) are stored in the
//! platform's native secure storage, encrypted so that the ciphertext only
//! decrypts on the same physical device *and* the same logical install.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM sealing with a scrypt key derived from the
//!   device-bound identifier and the install id.
//! - [`device`]: platform machine-id resolution.
//! - [`install`]: per-install UUID, persisted once, immutable after.
//! - [`backend`]: OS secret-store adapters plus an explicit in-memory
//!   backend for tests.
//! - [`vault`]: the encrypt-on-write / decrypt-on-read façade.
//! - [`secure_ref`]: `secure:<account>` indirection for structured
//!   configuration, with plaintext-to-vault migration.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kestrel_vault::backend::platform_backend;
//! use kestrel_vault::crypto::StorageCrypto;
//! use kestrel_vault::install::resolve_install_id;
//! use kestrel_vault::vault::SecretVault;
//!
//! # fn example() -> kestrel_vault::Result<()> {
//! let state_dir = std::path::Path::new("/home/user/.kestrel");
//! let install_id = resolve_install_id(state_dir)?;
//! let vault = SecretVault::new(
//!     Arc::from(platform_backend()?),
//!     StorageCrypto::for_this_device()?,
//!     install_id,
//!     "kestrel",
//! );
//! vault.write_secret("google-access-token", "ya29.a0...")?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod crypto;
pub mod device;
pub mod error;
pub mod install;
pub mod secure_ref;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use backend::{MemoryBackend, SecretBackend, platform_backend};
pub use crypto::StorageCrypto;
pub use error::{Result, VaultError};
pub use install::resolve_install_id;
pub use secure_ref::{CredentialStore, ProviderCredential};
pub use vault::SecretVault;
