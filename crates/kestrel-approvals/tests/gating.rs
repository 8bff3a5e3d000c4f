//! End-to-end gating scenarios: the gate prompting through a live
//! [`ApprovalManager`], with a separate task playing the deciding human.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kestrel_approvals::{
    ApprovalDecision, ApprovalError, ApprovalGate, ApprovalManager, ApprovalOutcome,
    ApprovalPolicy, ApprovalRequester, DenialReason, FileApprovalParams, GrantStore,
    SessionApprovals, ToolApprovalRequest, ToolGroup,
};

/// Requester that registers the prompt with a manager and waits for a
/// decision, the way the RPC surface does.
struct ManagerRequester {
    manager: Arc<ApprovalManager>,
}

#[async_trait]
impl ApprovalRequester for ManagerRequester {
    async fn request_approval(
        &self,
        request: ToolApprovalRequest,
        timeout: Duration,
    ) -> kestrel_approvals::Result<ApprovalOutcome> {
        let record = self.manager.create(None, request, timeout)?;
        let decision = self.manager.await_decision(&record.id).await;
        Ok(ApprovalOutcome {
            id: record.id,
            decision,
        })
    }
}

fn gate(
    manager: Arc<ApprovalManager>,
    dir: &tempfile::TempDir,
    timeout: Duration,
) -> ApprovalGate {
    let mut policy = ApprovalPolicy::enabled();
    policy.timeout = timeout;
    ApprovalGate::new(
        policy,
        Arc::new(ManagerRequester { manager }),
        Arc::new(SessionApprovals::new()),
        GrantStore::new(dir.path().join("tool-approvals.json")),
    )
}

fn params(dir: &tempfile::TempDir, name: &str) -> FileApprovalParams {
    FileApprovalParams {
        tool_name: "fs_write".into(),
        tool_group: ToolGroup::FsWrite,
        cwd: dir.path().to_string_lossy().into_owned(),
        sandbox_root: None,
        session_key: Some("s1".into()),
        agent_id: Some("agent-main".into()),
        paths: vec![name.into()],
        summary: format!("write {name}"),
    }
}

#[tokio::test]
async fn human_approval_unblocks_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(ApprovalManager::new());
    let gate = gate(manager.clone(), &dir, Duration::from_secs(5));

    let resolver = {
        let manager = manager.clone();
        tokio::spawn(async move {
            // Poll until the prompt shows up, then approve it.
            loop {
                if let Some(record) = manager.pending_records().into_iter().next() {
                    assert_eq!(record.request.tool_name, "fs_write");
                    manager
                        .resolve(&record.id, ApprovalDecision::AllowAlways, Some("cli"))
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    gate.ensure_file_approval(params(&dir, "out.txt"))
        .await
        .unwrap();
    resolver.await.unwrap();

    // The allow-always landed in the grant file.
    let store = GrantStore::new(dir.path().join("tool-approvals.json"));
    assert_eq!(store.load().entries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_denies_on_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(ApprovalManager::new());
    let gate = gate(manager.clone(), &dir, Duration::from_millis(100));

    let err = gate
        .ensure_file_approval(params(&dir, "out.txt"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Denied {
            reason: DenialReason::ApprovalTimeout,
            ..
        }
    ));

    // The expired approval is no longer pending and cannot be resolved.
    assert!(manager.pending_records().is_empty());
}

#[tokio::test]
async fn human_denial_blocks_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(ApprovalManager::new());
    let gate = gate(manager.clone(), &dir, Duration::from_secs(5));

    let resolver = {
        let manager = manager.clone();
        tokio::spawn(async move {
            loop {
                if let Some(record) = manager.pending_records().into_iter().next() {
                    manager.resolve(&record.id, ApprovalDecision::Deny, None).unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let err = gate
        .ensure_file_approval(params(&dir, "out.txt"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Denied {
            reason: DenialReason::UserDenied,
            ..
        }
    ));
    resolver.await.unwrap();
    assert!(GrantStore::new(dir.path().join("tool-approvals.json"))
        .load()
        .entries
        .is_empty());
}
