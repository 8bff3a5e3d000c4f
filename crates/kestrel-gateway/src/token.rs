//! Per-install rendezvous token.
//!
//! Local frontends authenticate to the gateway with a shared token minted
//! on first use and kept encrypted in the vault. Unreadable state (device
//! change, corruption) re-mints rather than locking the gateway out.

use kestrel_vault::{SecretVault, VaultError};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

pub const GATEWAY_TOKEN_ACCOUNT: &str = "gateway-token";

/// The gateway token for this install, minting and persisting one if none
/// is stored.
pub fn resolve_gateway_token(vault: &SecretVault) -> Result<String> {
    match vault.read_secret(GATEWAY_TOKEN_ACCOUNT) {
        Ok(token) => {
            let token = token.trim().to_string();
            if !token.is_empty() {
                return Ok(token);
            }
        }
        Err(VaultError::SecretNotFound { .. }) => {}
        Err(err @ (VaultError::AuthenticationFailed | VaultError::InvalidCiphertextFormat)) => {
            warn!(error = %err, "stored gateway token unreadable, minting a new one");
        }
        Err(err) => return Err(err.into()),
    }
    let token = Uuid::new_v4().to_string();
    vault.write_secret(GATEWAY_TOKEN_ACCOUNT, &token)?;
    Ok(token)
}
