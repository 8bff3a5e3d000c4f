//! PKCE and CSRF-state material for the authorization code flow
//! (RFC 7636). PKCE is mandatory here; the broker is a public client and
//! never holds a client secret.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{IdentityError, Result};

/// Length of the code verifier in bytes (before base64url encoding).
const VERIFIER_BYTES: usize = 32;

/// Length of the CSRF state in bytes (before base64url encoding).
const STATE_BYTES: usize = 16;

/// Generate a PKCE code verifier (random 32 bytes, base64url encoded).
pub fn generate_verifier() -> Result<String> {
    random_b64url(VERIFIER_BYTES)
}

/// Generate the `state` parameter used to bind the callback to this flow.
pub fn generate_state() -> Result<String> {
    random_b64url(STATE_BYTES)
}

/// Derive the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

fn random_b64url(len: usize) -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes).map_err(|_| IdentityError::FlowFailed {
        reason: "CSPRNG failure".to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}
