//! Tool approval policy engine for Kestrel.
//!
//! Sensitive tool invocations (file reads/writes, browser actions) pass
//! through a human-in-the-loop gate before they run. The gate layers three
//! sources of authority:
//!
//! 1. the resolved [`gate::ApprovalPolicy`] (off / prompt-for-new / always),
//! 2. an in-memory per-session cache of earlier allow decisions,
//! 3. a persisted, user-owned grant file of allow-always patterns.
//!
//! Only when none of those clear a request does the gate prompt through an
//! [`gate::ApprovalRequester`], and any outcome other than an explicit
//! allow (denial, timeout, undeliverable prompt) fails closed.

pub mod error;
pub mod gate;
pub mod glob;
pub mod manager;
pub mod session;
pub mod store;
pub mod types;

pub use error::{ApprovalError, DenialReason, Result};
pub use gate::{
    ApprovalGate, ApprovalOutcome, ApprovalPolicy, ApprovalRequester, BrowserApprovalParams,
    BrowserMode, FileApprovalParams, FileMode, GrantPersistence, SessionNotifier,
    DEFAULT_APPROVAL_TIMEOUT,
};
pub use manager::ApprovalManager;
pub use session::SessionApprovals;
pub use store::{GrantEntry, GrantFile, GrantSnapshot, GrantStore, normalize_grant_file};
pub use types::{ApprovalDecision, ToolApprovalRecord, ToolApprovalRequest, ToolGroup};
