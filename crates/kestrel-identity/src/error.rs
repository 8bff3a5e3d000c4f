//! Identity broker error types.

use kestrel_vault::VaultError;

/// Unified error type for the Kestrel identity broker.
///
/// Variants never carry token or secret material; token endpoint failures
/// quote the server's error body, which is status text only.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Identity features are switched off for this install.
    #[error("identity sign-in is not enabled")]
    Disabled,

    /// No OAuth client id is configured.
    #[error("oauth client id is not configured")]
    NotConfigured,

    /// A sign-in flow is already waiting for its callback.
    #[error("sign-in already in progress")]
    SignInInProgress,

    /// `wait_sign_in` referenced an unknown or already-finished session.
    #[error("sign-in session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// The sign-in did not complete before the wait deadline.
    #[error("sign-in timed out")]
    TimedOut,

    /// The token exchange yielded no refresh token and none was stored.
    #[error("missing refresh token; re-authenticate to grant offline access")]
    MissingRefreshToken,

    /// The authorization server revoked or rejected the grant. Callers
    /// must treat this as a full sign-out.
    #[error("grant rejected by authorization server: {reason}")]
    InvalidGrant { reason: String },

    /// The token endpoint failed for a reason other than a bad grant.
    #[error("token endpoint failed (HTTP {status}): {reason}")]
    TokenEndpoint { status: u16, reason: String },

    /// The flow broke in a way the other variants do not cover (missing
    /// callback parameters, userinfo without an email, CSPRNG failure).
    #[error("sign-in flow failed: {reason}")]
    FlowFailed { reason: String },

    /// HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A configured endpoint URL did not parse.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The secret vault rejected a read or write.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the loopback listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, IdentityError>;
