//! RPC method dispatch.
//!
//! Every gateway capability is reachable through [`Gateway::handle`], which
//! takes a dotted method name and a JSON params object and returns a JSON
//! result. Param shapes are strict: unknown fields are rejected so client
//! typos surface as errors instead of silently ignored options.

use std::sync::Arc;
use std::time::Duration;

use kestrel_approvals::{
    ApprovalDecision, ApprovalManager, DEFAULT_APPROVAL_TIMEOUT, GrantSnapshot, GrantStore,
    ToolApprovalRequest, ToolGroup, normalize_grant_file,
};
use kestrel_identity::{DEFAULT_SIGN_IN_TIMEOUT, IdentityBroker};
use kestrel_vault::SecretVault;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::{GatewayError, Result};
use crate::events::{EventBus, GatewayEvent};
use crate::providers::ProviderRegistry;

/// The gateway's RPC surface over the vault, approvals, and identity
/// subsystems.
pub struct Gateway {
    vault: Arc<SecretVault>,
    manager: Arc<ApprovalManager>,
    store: GrantStore,
    broker: Arc<IdentityBroker>,
    providers: ProviderRegistry,
    events: EventBus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApprovalRequestParams {
    #[serde(default)]
    id: Option<String>,
    tool_name: String,
    tool_group: ToolGroup,
    summary: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    targets: Option<Vec<String>>,
    #[serde(default)]
    allow_always: Option<bool>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApprovalResolveParams {
    id: String,
    decision: ApprovalDecision,
    #[serde(default)]
    resolved_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApprovalsSetParams {
    file: Value,
    #[serde(default)]
    base_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdentityWaitParams {
    session_id: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProviderSetKeyParams {
    provider: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProviderClearKeyParams {
    provider: String,
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|err| GatewayError::InvalidParams {
        reason: err.to_string(),
    })
}

fn snapshot_response(store: &GrantStore, snapshot: &GrantSnapshot) -> Result<Value> {
    Ok(json!({
        "path": store.path().display().to_string(),
        "exists": snapshot.exists,
        "hash": snapshot.hash,
        "file": serde_json::to_value(&snapshot.file)?,
    }))
}

impl Gateway {
    pub fn new(
        vault: Arc<SecretVault>,
        manager: Arc<ApprovalManager>,
        store: GrantStore,
        broker: Arc<IdentityBroker>,
        providers: ProviderRegistry,
        events: EventBus,
    ) -> Self {
        Self {
            vault,
            manager,
            store,
            broker,
            providers,
            events,
        }
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Dispatch one RPC call.
    pub async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "tool.approval.request" => self.approval_request(params).await,
            "tool.approval.resolve" => self.approval_resolve(params),
            "tool.approvals.get" => self.approvals_get(),
            "tool.approvals.set" => self.approvals_set(params),
            "identity.get" => self.identity_get().await,
            "identity.signin.start" => self.identity_signin_start().await,
            "identity.signin.wait" => self.identity_signin_wait(params).await,
            "identity.signout" => self.identity_signout(),
            "providers.list" => self.providers_list(),
            "provider.apikey.set" => self.provider_apikey_set(params),
            "provider.apikey.clear" => self.provider_apikey_clear(params),
            other => Err(GatewayError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }

    /// Register a pending approval, announce it, and block until it is
    /// resolved or times out. A `null` decision in the response means the
    /// caller must deny.
    async fn approval_request(&self, params: Value) -> Result<Value> {
        let params: ApprovalRequestParams = parse_params(params)?;
        let timeout = params
            .timeout_ms
            .map(Duration::from_millis)
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_APPROVAL_TIMEOUT);
        let request = ToolApprovalRequest {
            tool_name: params.tool_name,
            tool_group: params.tool_group,
            summary: params.summary,
            cwd: params.cwd,
            agent_id: params.agent_id,
            session_key: params.session_key,
            target: params.target,
            targets: params.targets,
            allow_always: params.allow_always,
        };
        let record = self.manager.create(params.id, request, timeout)?;
        info!(id = %record.id, tool = %record.request.tool_name, "approval requested");
        self.events.publish(GatewayEvent::ApprovalRequested {
            id: record.id.clone(),
            request: record.request.clone(),
            created_at_ms: record.created_at_ms,
            expires_at_ms: record.expires_at_ms,
        });

        let decision = self.manager.await_decision(&record.id).await;
        Ok(json!({
            "id": record.id,
            "decision": decision.map(|d| d.as_str()),
            "createdAtMs": record.created_at_ms,
            "expiresAtMs": record.expires_at_ms,
        }))
    }

    fn approval_resolve(&self, params: Value) -> Result<Value> {
        let params: ApprovalResolveParams = parse_params(params)?;
        let record = self
            .manager
            .resolve(&params.id, params.decision, params.resolved_by.as_deref())
            .ok_or_else(|| GatewayError::UnknownApprovalId {
                id: params.id.clone(),
            })?;
        info!(id = %record.id, decision = params.decision.as_str(), "approval resolved");
        self.events.publish(GatewayEvent::ApprovalResolved {
            id: record.id,
            decision: params.decision,
            resolved_by: params.resolved_by,
            ts: chrono::Utc::now().timestamp_millis(),
        });
        Ok(json!({ "ok": true }))
    }

    /// Current grant file plus its content hash for optimistic writes.
    /// The file is rewritten in normalized form so the returned hash
    /// matches the bytes on disk.
    fn approvals_get(&self) -> Result<Value> {
        let file = self.store.load();
        self.store.save(&file)?;
        let snapshot = self.store.snapshot();
        snapshot_response(&self.store, &snapshot)
    }

    /// Replace the grant file. When one already exists the caller must
    /// prove freshness with the hash from a prior `tool.approvals.get`.
    fn approvals_set(&self, params: Value) -> Result<Value> {
        let params: ApprovalsSetParams = parse_params(params)?;
        let current = self.store.snapshot();
        let file = normalize_grant_file(&params.file);
        if current.exists {
            let base_hash = params
                .base_hash
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| GatewayError::InvalidParams {
                    reason: "baseHash required; re-run tool.approvals.get and retry".to_string(),
                })?;
            self.store.save_if_unchanged(&file, base_hash)?;
        } else {
            self.store.save(&file)?;
        }
        let snapshot = self.store.snapshot();
        snapshot_response(&self.store, &snapshot)
    }

    async fn identity_get(&self) -> Result<Value> {
        let identity = self.broker.get_identity().await?;
        Ok(json!({ "identity": identity }))
    }

    async fn identity_signin_start(&self) -> Result<Value> {
        let start = self.broker.start_sign_in().await?;
        Ok(json!({
            "sessionId": start.session_id,
            "authUrl": start.auth_url,
        }))
    }

    async fn identity_signin_wait(&self, params: Value) -> Result<Value> {
        let params: IdentityWaitParams = parse_params(params)?;
        let timeout = params
            .timeout_ms
            .map(Duration::from_millis)
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_SIGN_IN_TIMEOUT);
        let identity = self.broker.wait_sign_in(&params.session_id, timeout).await?;
        Ok(json!({ "identity": identity }))
    }

    fn identity_signout(&self) -> Result<Value> {
        self.broker.sign_out()?;
        Ok(json!({ "ok": true }))
    }

    fn providers_list(&self) -> Result<Value> {
        Ok(json!({ "providers": self.providers.list() }))
    }

    fn provider_apikey_set(&self, params: Value) -> Result<Value> {
        let params: ProviderSetKeyParams = parse_params(params)?;
        self.providers
            .set_api_key(&params.provider, &params.api_key)?;
        Ok(json!({ "ok": true }))
    }

    fn provider_apikey_clear(&self, params: Value) -> Result<Value> {
        let params: ProviderClearKeyParams = parse_params(params)?;
        self.providers.clear_api_key(&params.provider)?;
        Ok(json!({ "ok": true }))
    }
}
