//! Approval protocol types.
//!
//! These shapes travel between the gating side (tools asking for clearance)
//! and the deciding side (a human behind the UI/RPC layer). Field names are
//! camelCase on the wire to match the persisted files and the RPC surface.

use serde::{Deserialize, Serialize};

/// Coarse category of sensitive operation a policy grant is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolGroup {
    #[serde(rename = "fs.read")]
    FsRead,
    #[serde(rename = "fs.write")]
    FsWrite,
    #[serde(rename = "browser.read")]
    BrowserRead,
    #[serde(rename = "browser.control")]
    BrowserControl,
}

impl ToolGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FsRead => "fs.read",
            Self::FsWrite => "fs.write",
            Self::BrowserRead => "browser.read",
            Self::BrowserControl => "browser.control",
        }
    }

    /// File groups carry path targets; browser groups are the degenerate
    /// single-target case.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::FsRead | Self::FsWrite)
    }

    pub fn is_browser(&self) -> bool {
        !self.is_file()
    }
}

impl std::fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human's verdict on one approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    /// Approve this request only; cached for the session.
    AllowOnce,
    /// Approve and persist a matching grant for future sessions.
    AllowAlways,
    /// Refuse the request.
    Deny,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowOnce => "allow-once",
            Self::AllowAlways => "allow-always",
            Self::Deny => "deny",
        }
    }
}

/// What a tool wants to do, presented to the human for a decision.
///
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalRequest {
    pub tool_name: String,
    pub tool_group: ToolGroup,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Single target (path or opaque token), when exactly one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Batched targets, when more than one needs approval at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    /// Whether the UI should offer an allow-always option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_always: Option<bool>,
}

/// One pending (or terminally resolved) approval, owned by the manager for
/// its pending lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalRecord {
    pub id: String,
    pub request: ToolApprovalRequest,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}
