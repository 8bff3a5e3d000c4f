//! Approval engine error types.
//!
//! Timeouts are deliberately *not* an error variant: an elapsed approval
//! deadline yields a `None` decision that callers must treat as deny. The
//! [`ApprovalError::Denied`] variant is the terminal outcome the gating path
//! raises after surfacing the denial to the session.

use crate::types::ToolGroup;

/// Why a tool invocation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// A human explicitly chose deny.
    UserDenied,
    /// No decision arrived before the deadline (fail-closed default).
    ApprovalTimeout,
    /// The approval request could not be delivered at all.
    RequestFailed,
}

impl DenialReason {
    /// The reason tag carried in session notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserDenied => "user-denied",
            Self::ApprovalTimeout => "approval-timeout",
            Self::RequestFailed => "approval-request-failed",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the Kestrel approval engine.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// `create` was called with an explicit id that is already pending.
    #[error("approval id already pending: {id}")]
    DuplicateId { id: String },

    /// The gating path denied the tool invocation.
    #[error("tool denied ({reason}): {tool_name}")]
    Denied {
        tool_name: String,
        reason: DenialReason,
    },

    /// The request payload was malformed (unknown group, bad decision, ...).
    #[error("invalid approval request: {reason}")]
    InvalidRequest { reason: String },

    /// The persisted grant store changed since it was last read; the caller
    /// must re-read and retry.
    #[error("tool approvals changed since last load; re-read and retry")]
    StoreConflict,

    /// Delivering the approval request to the deciding side failed.
    #[error("approval request failed: {reason}")]
    RequestFailed { reason: String },

    /// A target path for this tool group is missing or unusable.
    #[error("invalid approval target for {tool_group}: {reason}")]
    InvalidTarget {
        tool_group: ToolGroup,
        reason: String,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the grant store file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ApprovalError>;
