//! Gateway error types.

use kestrel_approvals::ApprovalError;
use kestrel_identity::IdentityError;
use kestrel_vault::VaultError;

/// Unified error type for the Kestrel gateway surface.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The method name is not part of the RPC surface.
    #[error("unknown method: {method}")]
    UnknownMethod { method: String },

    /// Params failed schema validation.
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },

    /// `tool.approval.resolve` referenced an id that is not pending.
    #[error("unknown approval id: {id}")]
    UnknownApprovalId { id: String },

    /// Provider id outside the fixed catalog.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },

    /// `provider.apikey.set` with a blank key.
    #[error("apiKey is required")]
    ApiKeyRequired,

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the credential store file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
