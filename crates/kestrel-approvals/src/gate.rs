//! Tool gating: the decision path between "a tool wants to act" and "the
//! tool may act".
//!
//! The gate consults, in order, the policy modes, the per-session cache,
//! and the persisted grant store; only when none of those clear the
//! request does it prompt the deciding side through [`ApprovalRequester`].
//! Denials are errors; grant persistence after an allow-always is
//! best-effort and reported in the return value rather than failing the
//! already-approved invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApprovalError, DenialReason, Result};
use crate::glob;
use crate::session::SessionApprovals;
use crate::store::GrantStore;
use crate::types::{ApprovalDecision, ToolApprovalRequest, ToolGroup};

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Gating posture for file tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileMode {
    /// Never prompt for file access.
    Off,
    /// Prompt only for paths not covered by a session or persisted grant.
    OnNewPath,
    /// Prompt for every invocation, ignoring caches and grants.
    Always,
}

/// Gating posture for browser tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserMode {
    Off,
    /// Prompt once per session per group.
    PerSession,
    /// Prompt for every invocation.
    Always,
}

/// Resolved approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalPolicy {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub file_mode: FileMode,
    pub browser_mode: BrowserMode,
}

impl Default for ApprovalPolicy {
    /// Disabled policy; both groups off.
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: DEFAULT_APPROVAL_TIMEOUT,
            file_mode: FileMode::Off,
            browser_mode: BrowserMode::Off,
        }
    }
}

impl ApprovalPolicy {
    /// The default posture when approvals are switched on: prompt for new
    /// paths and once per browser session.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_APPROVAL_TIMEOUT,
            file_mode: FileMode::OnNewPath,
            browser_mode: BrowserMode::PerSession,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms.max(1)))
    }
}

/// Outcome of one prompt round-trip to the deciding side.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub id: String,
    /// `None` means the deadline passed without a decision.
    pub decision: Option<ApprovalDecision>,
}

/// The seam to whatever surfaces prompts to a human (RPC, UI, test stub).
#[async_trait]
pub trait ApprovalRequester: Send + Sync {
    async fn request_approval(
        &self,
        request: ToolApprovalRequest,
        timeout: Duration,
    ) -> Result<ApprovalOutcome>;
}

/// Receives denial notices addressed to the agent session, so the model
/// learns why a tool call failed. Notices carry the denial tag but never
/// any secret material.
pub trait SessionNotifier: Send + Sync {
    fn notify(&self, session_key: &str, context_key: &str, message: &str);
}

/// Whether (and how) an allow-always decision was persisted.
#[derive(Debug)]
pub enum GrantPersistence {
    /// The decision did not ask for persistence.
    NotRequested,
    /// Grants were written to the store.
    Saved,
    /// Persistence failed; the approval itself still stands.
    Failed(ApprovalError),
}

/// Parameters for gating a file tool invocation.
#[derive(Debug, Clone)]
pub struct FileApprovalParams {
    pub tool_name: String,
    pub tool_group: ToolGroup,
    /// Base directory for resolving relative paths.
    pub cwd: String,
    /// When the tool is sandboxed, approvals broaden to this root.
    pub sandbox_root: Option<String>,
    pub session_key: Option<String>,
    pub agent_id: Option<String>,
    pub paths: Vec<String>,
    pub summary: String,
}

/// Parameters for gating a browser tool invocation.
#[derive(Debug, Clone)]
pub struct BrowserApprovalParams {
    pub tool_group: ToolGroup,
    pub summary: String,
    pub cwd: Option<String>,
    pub session_key: Option<String>,
    pub agent_id: Option<String>,
    /// Always re-prompt, even under per-session mode. For high-risk
    /// actions like script evaluation.
    pub always_ask: bool,
}

pub struct ApprovalGate {
    policy: ApprovalPolicy,
    requester: Arc<dyn ApprovalRequester>,
    sessions: Arc<SessionApprovals>,
    store: GrantStore,
    notifier: Option<Arc<dyn SessionNotifier>>,
}

impl ApprovalGate {
    pub fn new(
        policy: ApprovalPolicy,
        requester: Arc<dyn ApprovalRequester>,
        sessions: Arc<SessionApprovals>,
        store: GrantStore,
    ) -> Self {
        Self {
            policy,
            requester,
            sessions,
            store,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SessionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Gate a file tool invocation over one or more paths.
    ///
    /// Returns `Ok` when the invocation may proceed. A denial, a timeout,
    /// or a failed prompt delivery all surface as [`ApprovalError::Denied`]
    /// with the corresponding reason.
    pub async fn ensure_file_approval(
        &self,
        params: FileApprovalParams,
    ) -> Result<GrantPersistence> {
        if !params.tool_group.is_file() {
            return Err(ApprovalError::InvalidTarget {
                tool_group: params.tool_group,
                reason: "expected a file tool group".into(),
            });
        }
        if !self.policy.enabled || self.policy.file_mode == FileMode::Off {
            return Ok(GrantPersistence::NotRequested);
        }

        let cwd = if params.cwd.trim().is_empty() {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            params.cwd.clone()
        };
        let mut canonical: Vec<String> = Vec::new();
        for raw in &params.paths {
            if raw.trim().is_empty() {
                continue;
            }
            let path = canonicalize_for_approval(raw, &cwd);
            if !canonical.contains(&path) {
                canonical.push(path);
            }
        }
        if canonical.is_empty() {
            return Ok(GrantPersistence::NotRequested);
        }

        // Phase 1: figure out which targets still need a human.
        let grants = if self.policy.file_mode == FileMode::Always {
            None
        } else {
            Some(self.store.load())
        };
        let mut needs_approval: Vec<String> = Vec::new();
        let mut matched_ids: Vec<String> = Vec::new();
        for target in &canonical {
            if self.policy.file_mode == FileMode::Always {
                needs_approval.push(target.clone());
                continue;
            }
            if self.sessions.has_approval(
                params.session_key.as_deref(),
                params.tool_group,
                Some(target),
            ) {
                continue;
            }
            match grants
                .as_ref()
                .and_then(|file| file.find_match(params.tool_group, target))
            {
                Some(entry) => {
                    if !matched_ids.contains(&entry.id) {
                        matched_ids.push(entry.id.clone());
                    }
                }
                None => needs_approval.push(target.clone()),
            }
        }

        // Usage stamping on matched grants is best-effort.
        if let Some(mut file) = grants.filter(|_| !matched_ids.is_empty()) {
            for id in &matched_ids {
                file.record_use(id, Some(&params.summary));
            }
            if let Err(err) = self.store.save(&file) {
                debug!(error = %err, "failed to stamp grant usage");
            }
        }

        if needs_approval.is_empty() {
            return Ok(GrantPersistence::NotRequested);
        }

        // Pin the grant-file bytes before prompting. Anyone editing the
        // file while the prompt is pending wins over the prompt's outcome.
        let snapshot = self.store.snapshot();

        // Phase 2: prompt.
        let request = ToolApprovalRequest {
            tool_name: params.tool_name.clone(),
            tool_group: params.tool_group,
            summary: params.summary.clone(),
            cwd: Some(cwd),
            agent_id: params.agent_id.clone(),
            session_key: params.session_key.clone(),
            target: (needs_approval.len() == 1).then(|| needs_approval[0].clone()),
            targets: (needs_approval.len() > 1).then(|| needs_approval.clone()),
            allow_always: Some(true),
        };
        let outcome = match self
            .requester
            .request_approval(request, self.policy.timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(tool = %params.tool_name, error = %err, "approval request failed");
                return Err(self.deny(
                    &params.tool_name,
                    params.session_key.as_deref(),
                    &params.summary,
                    None,
                    DenialReason::RequestFailed,
                ));
            }
        };
        let decision = match outcome.decision {
            None => {
                return Err(self.deny(
                    &params.tool_name,
                    params.session_key.as_deref(),
                    &params.summary,
                    Some(&outcome.id),
                    DenialReason::ApprovalTimeout,
                ));
            }
            Some(ApprovalDecision::Deny) => {
                return Err(self.deny(
                    &params.tool_name,
                    params.session_key.as_deref(),
                    &params.summary,
                    Some(&outcome.id),
                    DenialReason::UserDenied,
                ));
            }
            Some(decision) => decision,
        };

        // Phase 3: broaden the approval into patterns and remember them.
        let patterns: Vec<String> = match params
            .sandbox_root
            .as_deref()
            .map(str::trim)
            .filter(|root| !root.is_empty())
        {
            Some(root) => vec![glob::root_glob(&canonicalize_for_approval(
                root,
                &std::env::current_dir()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ))],
            None => {
                let mut out = Vec::new();
                for target in &needs_approval {
                    let pattern = glob::dir_glob(target);
                    if !pattern.trim().is_empty() && !out.contains(&pattern) {
                        out.push(pattern);
                    }
                }
                out
            }
        };
        for pattern in &patterns {
            self.sessions.record(
                params.session_key.as_deref(),
                params.tool_group,
                Some(pattern),
            );
        }

        if decision != ApprovalDecision::AllowAlways {
            return Ok(GrantPersistence::NotRequested);
        }
        let mut file = snapshot.file;
        let mut changed = false;
        for pattern in &patterns {
            changed |= file.add_entry(params.tool_group, pattern, Some(&params.summary));
        }
        if changed {
            match self.store.save_if_unchanged(&file, &snapshot.hash) {
                Ok(()) => Ok(GrantPersistence::Saved),
                Err(err) => {
                    warn!(error = %err, "failed to persist allow-always grant");
                    Ok(GrantPersistence::Failed(err))
                }
            }
        } else {
            Ok(GrantPersistence::Saved)
        }
    }

    /// Gate a browser tool invocation. Browser approvals never persist
    /// beyond the session.
    pub async fn ensure_browser_approval(&self, params: BrowserApprovalParams) -> Result<()> {
        if !params.tool_group.is_browser() {
            return Err(ApprovalError::InvalidTarget {
                tool_group: params.tool_group,
                reason: "expected a browser tool group".into(),
            });
        }
        if !self.policy.enabled || self.policy.browser_mode == BrowserMode::Off {
            return Ok(());
        }

        let always_ask = params.always_ask || self.policy.browser_mode == BrowserMode::Always;
        if !always_ask
            && self
                .sessions
                .has_approval(params.session_key.as_deref(), params.tool_group, None)
        {
            return Ok(());
        }

        let request = ToolApprovalRequest {
            tool_name: "browser".into(),
            tool_group: params.tool_group,
            summary: params.summary.clone(),
            cwd: params.cwd.clone(),
            agent_id: params.agent_id.clone(),
            session_key: params.session_key.clone(),
            target: None,
            targets: None,
            allow_always: Some(false),
        };
        let outcome = match self
            .requester
            .request_approval(request, self.policy.timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "approval request failed");
                return Err(self.deny(
                    "browser",
                    params.session_key.as_deref(),
                    &params.summary,
                    None,
                    DenialReason::RequestFailed,
                ));
            }
        };
        match outcome.decision {
            None => Err(self.deny(
                "browser",
                params.session_key.as_deref(),
                &params.summary,
                Some(&outcome.id),
                DenialReason::ApprovalTimeout,
            )),
            Some(ApprovalDecision::Deny) => Err(self.deny(
                "browser",
                params.session_key.as_deref(),
                &params.summary,
                Some(&outcome.id),
                DenialReason::UserDenied,
            )),
            Some(_) => {
                if !always_ask {
                    self.sessions
                        .record(params.session_key.as_deref(), params.tool_group, None);
                }
                Ok(())
            }
        }
    }

    fn deny(
        &self,
        tool_name: &str,
        session_key: Option<&str>,
        summary: &str,
        approval_id: Option<&str>,
        reason: DenialReason,
    ) -> ApprovalError {
        if let Some(notifier) = &self.notifier
            && let Some(session_key) = session_key.filter(|k| !k.trim().is_empty())
        {
            let id = approval_id.unwrap_or("unknown");
            notifier.notify(
                session_key,
                &format!("tool:{tool_name}"),
                &format!("Tool denied (id={id}, {reason}): {summary}"),
            );
        }
        ApprovalError::Denied {
            tool_name: tool_name.to_string(),
            reason,
        }
    }
}

fn normalize_unicode_spaces(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

/// Canonicalize a user-supplied path into the stable form grants are
/// written and matched against: home-expanded, absolute, symlinks
/// resolved where the filesystem allows.
fn canonicalize_for_approval(raw: &str, cwd: &str) -> String {
    let expanded = glob::expand_home(&normalize_unicode_spaces(raw));
    let absolute: PathBuf = if Path::new(&expanded).is_absolute() {
        PathBuf::from(&expanded)
    } else {
        Path::new(cwd).join(&expanded)
    };
    if let Ok(real) = std::fs::canonicalize(&absolute) {
        return real.to_string_lossy().into_owned();
    }
    // Target may not exist yet (fs.write of a new file). Resolve the
    // parent instead and re-attach the final component.
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name())
        && let Ok(parent_real) = std::fs::canonicalize(parent)
    {
        return parent_real.join(name).to_string_lossy().into_owned();
    }
    absolute.to_string_lossy().into_owned()
}
