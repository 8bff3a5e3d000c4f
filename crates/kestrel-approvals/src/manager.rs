//! Pending approval lifecycle.
//!
//! The manager owns every in-flight approval between request and decision.
//! Each approval resolves at most once; a decision that misses the deadline
//! is reported as `None`, which every caller must treat as deny.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApprovalError, Result};
use crate::store::now_ms;
use crate::types::{ApprovalDecision, ToolApprovalRecord, ToolApprovalRequest};

struct PendingApproval {
    record: ToolApprovalRecord,
    sender: Option<oneshot::Sender<(ApprovalDecision, Option<String>)>>,
    receiver: Option<oneshot::Receiver<(ApprovalDecision, Option<String>)>>,
}

/// Registry of pending approvals.
///
/// `create` registers a request, `await_decision` blocks one caller until
/// the human decides or the deadline passes, and `resolve` delivers the
/// decision. All three are safe to call from separate tasks.
#[derive(Default)]
pub struct ApprovalManager {
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending approval and return its record.
    ///
    /// Callers may supply an explicit id (the RPC surface does, so the
    /// requesting side can correlate); ids already pending are rejected
    /// rather than silently replacing the earlier request.
    pub fn create(
        &self,
        id: Option<String>,
        request: ToolApprovalRequest,
        timeout: Duration,
    ) -> Result<ToolApprovalRecord> {
        let id = match id.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(explicit) => explicit,
            None => Uuid::new_v4().to_string(),
        };
        let now = now_ms();
        let record = ToolApprovalRecord {
            id: id.clone(),
            request,
            created_at_ms: now,
            expires_at_ms: now + timeout.as_millis() as i64,
            resolved_at_ms: None,
            decision: None,
            resolved_by: None,
        };
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(&id) {
            return Err(ApprovalError::DuplicateId { id });
        }
        debug!(approval_id = %id, tool = %record.request.tool_name, "approval pending");
        pending.insert(
            id,
            PendingApproval {
                record: record.clone(),
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
        Ok(record)
    }

    /// Wait for the decision on `id`, up to its deadline.
    ///
    /// Returns `None` when the deadline passes, when the id is unknown, or
    /// when a second caller tries to wait on the same approval. A `None`
    /// removes the pending entry, so a decision arriving later reports
    /// "nothing was pending" to the resolver.
    pub async fn await_decision(&self, id: &str) -> Option<ApprovalDecision> {
        let (receiver, deadline_ms) = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let entry = pending.get_mut(id)?;
            (entry.receiver.take()?, entry.record.expires_at_ms)
        };
        let remaining = deadline_ms.saturating_sub(now_ms()).max(0) as u64;
        match tokio::time::timeout(Duration::from_millis(remaining), receiver).await {
            Ok(Ok((decision, _resolved_by))) => Some(decision),
            // Timeout, or the manager dropped the sender. Either way the
            // approval is dead; fail closed.
            Ok(Err(_)) | Err(_) => {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.remove(id);
                debug!(approval_id = %id, "approval expired without decision");
                None
            }
        }
    }

    /// Deliver a decision for `id`.
    ///
    /// Returns the resolved record when a pending approval existed, `None`
    /// when the id is unknown or already timed out. Late decisions are
    /// dropped, never applied.
    pub fn resolve(
        &self,
        id: &str,
        decision: ApprovalDecision,
        resolved_by: Option<&str>,
    ) -> Option<ToolApprovalRecord> {
        let mut entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(id)?
        };
        entry.record.resolved_at_ms = Some(now_ms());
        entry.record.decision = Some(decision);
        entry.record.resolved_by = resolved_by.map(str::to_string);
        if let Some(sender) = entry.sender.take() {
            // The waiter may have given up; the decision still counts as
            // delivered for the resolver's bookkeeping.
            let _ = sender.send((decision, resolved_by.map(str::to_string)));
        }
        debug!(approval_id = %id, decision = decision.as_str(), "approval resolved");
        Some(entry.record)
    }

    /// Snapshot of requests still awaiting a decision.
    pub fn pending_records(&self) -> Vec<ToolApprovalRecord> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<_> = pending.values().map(|e| e.record.clone()).collect();
        records.sort_by_key(|r| r.created_at_ms);
        records
    }
}
