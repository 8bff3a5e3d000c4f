//! The identity broker: one Google account per install, signed in through
//! a loopback OAuth callback, with tokens and the identity record held in
//! the encrypted vault.
//!
//! State machine: `start_sign_in` binds a localhost listener and hands the
//! caller a consent URL; the browser redirect lands on that listener,
//! which exchanges the code and persists the result; `wait_sign_in`
//! blocks until the flow finishes or times out. At most one sign-in flow
//! exists at a time. `get_identity` is the read path every other feature
//! uses and degrades softly: transient refresh failures return the stale
//! identity, a revoked grant signs the install out.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kestrel_vault::{SecretVault, VaultError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::http::{OAuthHttp, REFRESH_SKEW_MS};
use crate::pkce;

/// Vault accounts the broker owns.
const ACCESS_TOKEN_ACCOUNT: &str = "google-access-token";
const REFRESH_TOKEN_ACCOUNT: &str = "google-refresh-token";
const IDENTITY_ACCOUNT: &str = "google-identity";

/// Default deadline for `wait_sign_in`.
pub const DEFAULT_SIGN_IN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The signed-in user, as persisted in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub expires_at_ms: i64,
}

/// Handle returned from `start_sign_in`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInStart {
    pub session_id: String,
    pub auth_url: String,
}

/// Broker switches that come from configuration rather than the OAuth
/// endpoint set.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Master switch; when off, every identity call reports disabled or
    /// absent.
    pub enabled: bool,
    /// Fixed loopback port for the OAuth redirect, or 0 for an ephemeral
    /// port.
    pub redirect_port: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redirect_port: 0,
        }
    }
}

struct PendingSignIn {
    session_id: String,
    receiver: Option<oneshot::Receiver<Result<IdentityRecord>>>,
    task: JoinHandle<()>,
}

pub struct IdentityBroker {
    vault: Arc<SecretVault>,
    http: OAuthHttp,
    config: IdentityConfig,
    pending: Mutex<Option<PendingSignIn>>,
}

impl IdentityBroker {
    pub fn new(vault: Arc<SecretVault>, http: OAuthHttp, config: IdentityConfig) -> Self {
        Self {
            vault,
            http,
            config,
            pending: Mutex::new(None),
        }
    }

    /// The current identity, refreshed if it is about to expire.
    ///
    /// Returns `Ok(None)` when the feature is disabled, nothing is stored,
    /// or the stored grant turned out to be revoked. A refresh that fails
    /// for transient reasons returns the stale record rather than erroring:
    /// callers treat identity as advisory, not load-bearing.
    pub async fn get_identity(&self) -> Result<Option<IdentityRecord>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let Some(identity) = self.read_identity_record() else {
            return Ok(None);
        };
        let now = chrono::Utc::now().timestamp_millis();
        if now < identity.expires_at_ms - REFRESH_SKEW_MS {
            return Ok(Some(identity));
        }
        if self.http.config().client_id.trim().is_empty() {
            // Cannot refresh without a client id; surface what we have.
            return Ok(Some(identity));
        }
        let Some(refresh_token) = self.read_token(REFRESH_TOKEN_ACCOUNT) else {
            // An identity without a refresh token is unrecoverable.
            self.sign_out()?;
            return Ok(None);
        };
        match self.http.refresh_access_token(&refresh_token).await {
            Ok(grant) => {
                self.vault
                    .write_secret(ACCESS_TOKEN_ACCOUNT, &grant.access_token)?;
                let refreshed = IdentityRecord {
                    expires_at_ms: grant.expires_at_ms,
                    ..identity
                };
                self.vault
                    .write_secret(IDENTITY_ACCOUNT, &serde_json::to_string(&refreshed)?)?;
                debug!(email = %refreshed.email, "identity refreshed");
                Ok(Some(refreshed))
            }
            Err(IdentityError::InvalidGrant { reason }) => {
                info!(%reason, "stored grant revoked, signing out");
                self.sign_out()?;
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, returning stale identity");
                Ok(Some(identity))
            }
        }
    }

    /// Begin a sign-in flow: bind the loopback listener and return the
    /// consent URL for the caller to open in a browser.
    pub async fn start_sign_in(&self) -> Result<SignInStart> {
        if !self.config.enabled {
            return Err(IdentityError::Disabled);
        }
        if self.http.config().client_id.trim().is_empty() {
            return Err(IdentityError::NotConfigured);
        }
        {
            let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.is_some() {
                return Err(IdentityError::SignInInProgress);
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let verifier = pkce::generate_verifier()?;
        let state = pkce::generate_state()?;

        let listener =
            TcpListener::bind(("127.0.0.1", self.config.redirect_port)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let auth_url = self.http.authorization_url(&state, &verifier, &redirect_uri)?;
        info!(port, "sign-in callback listener ready");

        let (sender, receiver) = oneshot::channel();
        let task = tokio::spawn(run_callback_server(
            listener,
            CallbackContext {
                http: self.http.clone(),
                vault: self.vault.clone(),
                state,
                verifier,
                redirect_uri,
            },
            sender,
        ));

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        // Re-check under the lock; a racing start could have landed.
        if pending.is_some() {
            task.abort();
            return Err(IdentityError::SignInInProgress);
        }
        *pending = Some(PendingSignIn {
            session_id: session_id.clone(),
            receiver: Some(receiver),
            task,
        });
        Ok(SignInStart {
            session_id,
            auth_url,
        })
    }

    /// Wait for the pending sign-in to finish.
    ///
    /// Timing out or failing tears the session down, so a fresh
    /// `start_sign_in` is always possible afterwards.
    pub async fn wait_sign_in(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<IdentityRecord> {
        let receiver = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.as_mut() {
                Some(entry) if entry.session_id == session_id => entry.receiver.take(),
                _ => None,
            }
        }
        .ok_or_else(|| IdentityError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

        let outcome = tokio::time::timeout(timeout, receiver).await;
        self.close_session(session_id);
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IdentityError::FlowFailed {
                reason: "sign-in ended without a result".to_string(),
            }),
            Err(_) => Err(IdentityError::TimedOut),
        }
    }

    /// Remove every stored credential and the identity record. Idempotent.
    pub fn sign_out(&self) -> Result<()> {
        self.vault.delete_secret(ACCESS_TOKEN_ACCOUNT)?;
        self.vault.delete_secret(REFRESH_TOKEN_ACCOUNT)?;
        self.vault.delete_secret(IDENTITY_ACCOUNT)?;
        Ok(())
    }

    fn close_session(&self, session_id: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = pending.as_ref()
            && entry.session_id == session_id
        {
            // Dropping the task drops the listener with it.
            entry.task.abort();
            *pending = None;
        }
    }

    fn read_identity_record(&self) -> Option<IdentityRecord> {
        match self.vault.read_secret(IDENTITY_ACCOUNT) {
            Ok(raw) => parse_identity_record(&raw),
            Err(VaultError::SecretNotFound { .. }) => None,
            Err(err) => {
                // Undecryptable state (device change, tampering) reads as
                // signed out rather than an error.
                warn!(error = %err, "identity record unreadable");
                None
            }
        }
    }

    fn read_token(&self, account: &str) -> Option<String> {
        match self.vault.read_secret(account) {
            Ok(token) => {
                let token = token.trim().to_string();
                (!token.is_empty()).then_some(token)
            }
            Err(VaultError::SecretNotFound { .. }) => None,
            Err(err) => {
                warn!(account, error = %err, "stored token unreadable");
                None
            }
        }
    }
}

/// Everything the callback task needs, captured by value so the broker
/// itself stays out of the task.
struct CallbackContext {
    http: OAuthHttp,
    vault: Arc<SecretVault>,
    state: String,
    verifier: String,
    redirect_uri: String,
}

/// Serve the loopback listener until one callback completes the flow.
///
/// Requests that are not `GET /callback` get a 404 and the listener keeps
/// waiting. A state mismatch gets a 400 and also keeps waiting, so a
/// stray or forged request cannot kill a legitimate flow.
async fn run_callback_server(
    listener: TcpListener,
    ctx: CallbackContext,
    sender: oneshot::Sender<Result<IdentityRecord>>,
) {
    let result = loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                break Err(IdentityError::Io(err));
            }
        };
        debug!(peer = %peer, "callback connection accepted");

        let mut buf = [0u8; 8192];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
        match parse_callback(&request, &ctx.state) {
            Callback::NotCallback => {
                let _ = write_response(&mut stream, 404, "").await;
            }
            Callback::BadState => {
                let _ = write_html(&mut stream, false, "Invalid callback state.").await;
            }
            Callback::ProviderError(error) => {
                let _ = write_html(&mut stream, false, &format!("OAuth error: {error}")).await;
                break Err(IdentityError::FlowFailed {
                    reason: format!("authorization server returned error: {error}"),
                });
            }
            Callback::MissingCode => {
                let _ = write_html(&mut stream, false, "Missing OAuth code.").await;
                break Err(IdentityError::FlowFailed {
                    reason: "callback missing 'code' parameter".to_string(),
                });
            }
            Callback::Code(code) => match complete_sign_in(&ctx, &code).await {
                Ok(identity) => {
                    let _ = write_html(&mut stream, true, "You're signed in.").await;
                    break Ok(identity);
                }
                Err(err) => {
                    let _ = write_html(&mut stream, false, "Token exchange failed.").await;
                    break Err(err);
                }
            },
        }
    };
    let _ = sender.send(result);
}

/// Exchange the code, secure a refresh token, fetch the profile, and
/// persist all three vault records.
async fn complete_sign_in(ctx: &CallbackContext, code: &str) -> Result<IdentityRecord> {
    let grant = ctx
        .http
        .exchange_code(code, &ctx.verifier, &ctx.redirect_uri)
        .await?;
    let refresh_token = match grant.refresh_token.clone() {
        Some(token) => token,
        // Repeat consents sometimes omit the refresh token; fall back to
        // the one already stored.
        None => match ctx.vault.read_secret(REFRESH_TOKEN_ACCOUNT) {
            Ok(existing) if !existing.trim().is_empty() => existing,
            _ => return Err(IdentityError::MissingRefreshToken),
        },
    };
    let profile = ctx.http.fetch_user_info(&grant.access_token).await?;

    ctx.vault
        .write_secret(ACCESS_TOKEN_ACCOUNT, &grant.access_token)?;
    ctx.vault
        .write_secret(REFRESH_TOKEN_ACCOUNT, &refresh_token)?;
    let identity = IdentityRecord {
        email: profile.email,
        name: profile.name,
        picture: profile.picture,
        id: profile.id,
        expires_at_ms: grant.expires_at_ms,
    };
    ctx.vault
        .write_secret(IDENTITY_ACCOUNT, &serde_json::to_string(&identity)?)?;
    info!(email = %identity.email, "sign-in complete");
    Ok(identity)
}

enum Callback {
    /// Not `GET /callback`.
    NotCallback,
    /// Missing or mismatched `state`.
    BadState,
    ProviderError(String),
    MissingCode,
    Code(String),
}

fn parse_callback(request: &str, expected_state: &str) -> Callback {
    let Some(request_line) = request.lines().next() else {
        return Callback::NotCallback;
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    if method != "GET" {
        return Callback::NotCallback;
    }
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{path}")) else {
        return Callback::NotCallback;
    };
    if url.path() != "/callback" {
        return Callback::NotCallback;
    }
    let mut state = None;
    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "state" => state = Some(value.into_owned()),
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    match state.as_deref() {
        Some(s) if !s.is_empty() && s == expected_state => {}
        _ => return Callback::BadState,
    }
    if let Some(error) = error {
        return Callback::ProviderError(error);
    }
    match code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) {
        Some(code) => Callback::Code(code),
        None => Callback::MissingCode,
    }
}

async fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

async fn write_html(stream: &mut TcpStream, ok: bool, message: &str) -> std::io::Result<()> {
    let heading = if ok { "Sign-in complete" } else { "Sign-in failed" };
    let body = format!(
        "<!doctype html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Kestrel sign-in</title></head>\n<body style=\"font-family: system-ui, sans-serif; padding: 24px;\">\n<h2>{heading}</h2>\n<p>{message}</p>\n<p style=\"color: #666;\">You can close this tab and return to Kestrel.</p>\n</body>\n</html>"
    );
    write_response(stream, if ok { 200 } else { 400 }, &body).await
}

/// Parse a persisted identity record, rejecting shapes without a usable
/// email or expiry.
fn parse_identity_record(raw: &str) -> Option<IdentityRecord> {
    let parsed: IdentityRecord = serde_json::from_str(raw).ok()?;
    let email = parsed.email.trim();
    if email.is_empty() || parsed.expires_at_ms <= 0 {
        return None;
    }
    Some(IdentityRecord {
        email: email.to_string(),
        name: parsed.name.filter(|n| !n.trim().is_empty()),
        picture: parsed.picture.filter(|p| !p.trim().is_empty()),
        id: parsed.id.filter(|i| !i.trim().is_empty()),
        expires_at_ms: parsed.expires_at_ms,
    })
}
