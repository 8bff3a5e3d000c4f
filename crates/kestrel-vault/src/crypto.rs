//! Storage crypto: device- and install-bound authenticated encryption.
//!
//! Secrets written to OS secret stores (Keychain, Credential Manager) are
//! encrypted first so they only decrypt on the same machine *and* the same
//! logical install. The key is derived with scrypt from the device-bound
//! identifier, salted with a fixed prefix plus the install id, and the
//! payload is sealed with AES-256-GCM under a fresh random 96-bit nonce.
//!
//! Ciphertext format: `base64(nonce):base64(tag):base64(ciphertext)`.
//!
//! # Security Notes
//!
//! - Nonces are generated randomly per encryption call, so encrypting the
//!   same plaintext twice yields different ciphertexts. With a 96-bit nonce
//!   the collision probability is negligible for up to ~2^32 encryptions
//!   under the same key.
//! - scrypt (N=2^14, r=8, p=1) keeps key derivation memory-hard; a leaked
//!   ciphertext cannot be brute-forced cheaply even if the salt is known.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use scrypt::Params;

use crate::device::resolve_platform_device_id;
use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the AES-256-GCM authentication tag in bytes.
const TAG_LEN: usize = 16;

/// Salt prefix concatenated with the install id for key derivation.
/// Changing this invalidates every previously stored ciphertext.
const SALT_PREFIX: &str = "kestrel-v1-salt:";

/// scrypt cost parameters: N=2^14, r=8, p=1 (interactive-grade, memory-hard).
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` requires a [`NonceSequence`] for sealing operations. Since we
/// generate a fresh random nonce per encryption call, this wrapper ensures
/// each sealing key is used exactly once.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Encrypts and decrypts values bound to one physical device.
///
/// Holds the resolved device identifier; the install id is passed per call so
/// one instance can serve multiple key scopes (e.g. during tests).
pub struct StorageCrypto {
    device_id: String,
}

impl StorageCrypto {
    /// Create a crypto instance with an explicit device identifier.
    ///
    /// This is the dependency-injection seam: tests and embedders pass a
    /// fixed id instead of probing the platform.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Create a crypto instance bound to this machine's platform identifier.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DeviceIdUnavailable`] if the platform exposes no
    /// machine identifier.
    pub fn for_this_device() -> Result<Self> {
        Ok(Self::new(resolve_platform_device_id()?))
    }

    /// Derive the 256-bit key for the given install scope.
    fn derive_key(&self, install_id: &str) -> Result<[u8; KEY_LEN]> {
        let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN).map_err(|e| {
            VaultError::KeyDerivationFailed {
                reason: format!("invalid scrypt params: {e}"),
            }
        })?;
        let salt = format!("{SALT_PREFIX}{install_id}");
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(self.device_id.as_bytes(), salt.as_bytes(), &params, &mut key).map_err(
            |e| VaultError::KeyDerivationFailed {
                reason: format!("scrypt failed: {e}"),
            },
        )?;
        Ok(key)
    }

    /// Encrypt `plaintext` for storage, scoped to `install_id`.
    ///
    /// Returns the delimited `nonce:tag:ciphertext` base64 triple. Two calls
    /// with identical inputs produce different outputs (fresh nonce).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] on CSPRNG or `ring` failure,
    /// [`VaultError::KeyDerivationFailed`] if scrypt rejects its parameters.
    pub fn encrypt(&self, plaintext: &str, install_id: &str) -> Result<String> {
        let key = self.derive_key(install_id)?;

        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to generate random nonce".into(),
            })?;

        let unbound_key =
            UnboundKey::new(AEAD_ALG, &key).map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to create AES-256-GCM key".into(),
            })?;
        let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        // `ring` encrypts in-place and appends the authentication tag; the
        // storage format keeps the tag as its own segment.
        let mut in_out = plaintext.as_bytes().to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "seal_in_place failed".into(),
            })?;

        let tag_start = in_out.len() - TAG_LEN;
        let (ciphertext, tag) = in_out.split_at(tag_start);

        Ok(format!(
            "{}:{}:{}",
            B64.encode(nonce_bytes),
            B64.encode(tag),
            B64.encode(ciphertext)
        ))
    }

    /// Decrypt a stored `nonce:tag:ciphertext` triple scoped to `install_id`.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidCiphertextFormat`] if the value is not three
    ///   non-empty base64 segments.
    /// - [`VaultError::AuthenticationFailed`] if the tag check fails (wrong
    ///   install id, wrong device, or tampered data).
    pub fn decrypt(&self, stored: &str, install_id: &str) -> Result<String> {
        let mut parts = stored.splitn(3, ':');
        let (nonce_b64, tag_b64, ciphertext_b64) =
            match (parts.next(), parts.next(), parts.next()) {
                // The ciphertext segment may be empty (empty plaintext);
                // nonce and tag never are.
                (Some(a), Some(b), Some(c)) if !a.is_empty() && !b.is_empty() => (a, b, c),
                _ => return Err(VaultError::InvalidCiphertextFormat),
            };

        let nonce_bytes = B64
            .decode(nonce_b64)
            .map_err(|_| VaultError::InvalidCiphertextFormat)?;
        let tag = B64
            .decode(tag_b64)
            .map_err(|_| VaultError::InvalidCiphertextFormat)?;
        let ciphertext = B64
            .decode(ciphertext_b64)
            .map_err(|_| VaultError::InvalidCiphertextFormat)?;
        if nonce_bytes.len() != NONCE_LEN_BYTES || tag.len() != TAG_LEN {
            return Err(VaultError::InvalidCiphertextFormat);
        }

        let key = self.derive_key(install_id)?;
        let unbound_key =
            UnboundKey::new(AEAD_ALG, &key).map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to create AES-256-GCM key".into(),
            })?;

        let mut nonce = [0u8; NONCE_LEN_BYTES];
        nonce.copy_from_slice(&nonce_bytes);
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce));

        // Reassemble ciphertext || tag, the layout ring opens in place.
        let mut in_out = ciphertext;
        in_out.extend_from_slice(&tag);
        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::AuthenticationFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::AuthenticationFailed)
    }
}

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random bytes".into(),
        })?;
    Ok(buf)
}
