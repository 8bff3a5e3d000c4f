//! End-to-end sign-in and refresh scenarios against mock OAuth endpoints.
//!
//! The mock server is a minimal raw-TCP HTTP responder: enough to play
//! the token and userinfo endpoints for a loopback flow.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kestrel_identity::{
    IdentityBroker, IdentityConfig, IdentityError, IdentityRecord, OAuthConfig, OAuthHttp,
};
use kestrel_vault::backend::MemoryBackend;
use kestrel_vault::crypto::StorageCrypto;
use kestrel_vault::vault::SecretVault;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

struct MockOAuthServer {
    base_url: String,
    token_requests: Arc<AtomicUsize>,
}

/// Serve canned `(status, json)` responses for `/token` and `/userinfo`.
async fn spawn_mock_server(
    token_response: (u16, String),
    userinfo_response: (u16, String),
) -> MockOAuthServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let token_requests = Arc::new(AtomicUsize::new(0));
    let counter = token_requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let path = request
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or("/");
            let (status, body) = if path.starts_with("/token") {
                counter.fetch_add(1, Ordering::SeqCst);
                token_response.clone()
            } else if path.starts_with("/userinfo") {
                userinfo_response.clone()
            } else {
                (404, "{}".to_string())
            };
            let status_text = if status == 200 { "OK" } else { "Bad Request" };
            let response = format!(
                "HTTP/1.1 {status} {status_text}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
        }
    });
    MockOAuthServer {
        base_url: format!("http://127.0.0.1:{port}"),
        token_requests,
    }
}

fn broker_with(server: &MockOAuthServer, vault: Arc<SecretVault>) -> IdentityBroker {
    let config = OAuthConfig {
        client_id: "test-client".into(),
        auth_url: format!("{}/auth", server.base_url),
        token_url: format!("{}/token", server.base_url),
        userinfo_url: format!("{}/userinfo", server.base_url),
        scopes: vec!["openid".into(), "email".into()],
    };
    IdentityBroker::new(
        vault,
        OAuthHttp::new(config),
        IdentityConfig {
            enabled: true,
            redirect_port: 0,
        },
    )
}

fn fresh_vault() -> (Arc<MemoryBackend>, Arc<SecretVault>) {
    let backend = Arc::new(MemoryBackend::new());
    let vault = Arc::new(SecretVault::new(
        backend.clone(),
        StorageCrypto::new("test-device"),
        "install-1",
        "kestrel",
    ));
    (backend, vault)
}

fn good_token_body() -> String {
    r#"{"access_token":"ya29.access","refresh_token":"1//refresh","expires_in":3600}"#.to_string()
}

fn good_userinfo_body() -> String {
    r#"{"email":"user@example.com","name":"Test User","id":"1001"}"#.to_string()
}

/// Play the browser: hit the loopback callback with the given query.
async fn browse_callback(auth_url: &str, query: &str) -> String {
    let url = Url::parse(auth_url).unwrap();
    let params: std::collections::HashMap<_, _> = url.query_pairs().collect();
    let redirect = Url::parse(params.get("redirect_uri").unwrap()).unwrap();
    let addr = format!(
        "{}:{}",
        redirect.host_str().unwrap(),
        redirect.port().unwrap()
    );
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    let request = format!("GET /callback?{query} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn state_of(auth_url: &str) -> String {
    let url = Url::parse(auth_url).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn full_sign_in_persists_encrypted_tokens() {
    let server = spawn_mock_server((200, good_token_body()), (200, good_userinfo_body())).await;
    let (backend, vault) = fresh_vault();
    let broker = broker_with(&server, vault.clone());

    let start = broker.start_sign_in().await.unwrap();
    let state = state_of(&start.auth_url);
    let response = browse_callback(&start.auth_url, &format!("state={state}&code=auth-code")).await;
    assert!(response.contains("200 OK"));
    assert!(response.contains("signed in"));

    let identity = broker
        .wait_sign_in(&start.session_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(identity.email, "user@example.com");
    assert_eq!(identity.name.as_deref(), Some("Test User"));
    assert!(identity.expires_at_ms > chrono::Utc::now().timestamp_millis());

    // The vault decrypts the tokens back.
    assert_eq!(vault.read_secret("google-access-token").unwrap(), "ya29.access");
    assert_eq!(vault.read_secret("google-refresh-token").unwrap(), "1//refresh");

    // The backing store holds only ciphertext.
    use kestrel_vault::backend::SecretBackend;
    let stored = backend.read("kestrel", "google-access-token").unwrap();
    assert_ne!(stored, "ya29.access");
    assert!(!stored.contains("ya29"));
    let stored_identity = backend.read("kestrel", "google-identity").unwrap();
    assert!(!stored_identity.contains("user@example.com"));

    // A fresh, unexpired identity reads back without touching the network.
    let read_back = broker.get_identity().await.unwrap().unwrap();
    assert_eq!(read_back.email, "user@example.com");
    assert_eq!(server.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forged_state_is_rejected_without_killing_the_flow() {
    let server = spawn_mock_server((200, good_token_body()), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    let broker = broker_with(&server, vault);

    let start = broker.start_sign_in().await.unwrap();
    let state = state_of(&start.auth_url);

    let forged = browse_callback(&start.auth_url, "state=wrong&code=evil-code").await;
    assert!(forged.contains("400"));
    // The forged request never reached the token endpoint.
    assert_eq!(server.token_requests.load(Ordering::SeqCst), 0);

    // The legitimate redirect still completes.
    let genuine = browse_callback(&start.auth_url, &format!("state={state}&code=auth-code")).await;
    assert!(genuine.contains("200 OK"));
    let identity = broker
        .wait_sign_in(&start.session_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(identity.email, "user@example.com");
}

#[tokio::test]
async fn only_one_sign_in_at_a_time() {
    let server = spawn_mock_server((200, good_token_body()), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    let broker = broker_with(&server, vault);

    let start = broker.start_sign_in().await.unwrap();
    assert!(matches!(
        broker.start_sign_in().await,
        Err(IdentityError::SignInInProgress)
    ));

    // Timing out tears the session down and frees the slot.
    assert!(matches!(
        broker
            .wait_sign_in(&start.session_id, Duration::from_millis(50))
            .await,
        Err(IdentityError::TimedOut)
    ));
    assert!(broker.start_sign_in().await.is_ok());
}

#[tokio::test]
async fn wait_for_unknown_session_fails() {
    let server = spawn_mock_server((200, good_token_body()), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    let broker = broker_with(&server, vault);
    assert!(matches!(
        broker
            .wait_sign_in("missing", Duration::from_millis(50))
            .await,
        Err(IdentityError::SessionNotFound { .. })
    ));
}

fn seed_expired_identity(vault: &SecretVault) {
    let record = IdentityRecord {
        email: "user@example.com".into(),
        name: None,
        picture: None,
        id: None,
        expires_at_ms: chrono::Utc::now().timestamp_millis() - 1_000,
    };
    vault
        .write_secret("google-identity", &serde_json::to_string(&record).unwrap())
        .unwrap();
    vault
        .write_secret("google-refresh-token", "1//stored-refresh")
        .unwrap();
    vault.write_secret("google-access-token", "old-access").unwrap();
}

#[tokio::test]
async fn expired_identity_refreshes_in_place() {
    let refreshed = r#"{"access_token":"ya29.new","expires_in":3600}"#.to_string();
    let server = spawn_mock_server((200, refreshed), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    seed_expired_identity(&vault);
    let broker = broker_with(&server, vault.clone());

    let identity = broker.get_identity().await.unwrap().unwrap();
    assert_eq!(identity.email, "user@example.com");
    assert!(identity.expires_at_ms > chrono::Utc::now().timestamp_millis());
    assert_eq!(vault.read_secret("google-access-token").unwrap(), "ya29.new");
    assert_eq!(server.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn revoked_grant_signs_the_install_out() {
    let rejection = r#"{"error":"invalid_grant","error_description":"Token revoked"}"#.to_string();
    let server = spawn_mock_server((400, rejection), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    seed_expired_identity(&vault);
    let broker = broker_with(&server, vault.clone());

    assert!(broker.get_identity().await.unwrap().is_none());
    // All three records are gone.
    assert!(vault.read_secret("google-access-token").is_err());
    assert!(vault.read_secret("google-refresh-token").is_err());
    assert!(vault.read_secret("google-identity").is_err());
}

#[tokio::test]
async fn transient_refresh_failure_returns_stale_identity() {
    let flaky = r#"{"error":"internal_error"}"#.to_string();
    let server = spawn_mock_server((500, flaky), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    seed_expired_identity(&vault);
    let broker = broker_with(&server, vault.clone());

    let identity = broker.get_identity().await.unwrap().unwrap();
    assert_eq!(identity.email, "user@example.com");
    // Stale expiry preserved; nothing was deleted.
    assert!(identity.expires_at_ms < chrono::Utc::now().timestamp_millis());
    assert!(vault.read_secret("google-refresh-token").is_ok());
}

#[tokio::test]
async fn disabled_broker_reports_absent_identity() {
    let server = spawn_mock_server((200, good_token_body()), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    seed_expired_identity(&vault);
    let config = OAuthConfig {
        client_id: "test-client".into(),
        auth_url: format!("{}/auth", server.base_url),
        token_url: format!("{}/token", server.base_url),
        userinfo_url: format!("{}/userinfo", server.base_url),
        scopes: vec![],
    };
    let broker = IdentityBroker::new(
        vault,
        OAuthHttp::new(config),
        IdentityConfig {
            enabled: false,
            redirect_port: 0,
        },
    );
    assert!(broker.get_identity().await.unwrap().is_none());
    assert!(matches!(
        broker.start_sign_in().await,
        Err(IdentityError::Disabled)
    ));
}

#[tokio::test]
async fn sign_out_is_idempotent() {
    let server = spawn_mock_server((200, good_token_body()), (200, good_userinfo_body())).await;
    let (_backend, vault) = fresh_vault();
    seed_expired_identity(&vault);
    let broker = broker_with(&server, vault.clone());
    broker.sign_out().unwrap();
    broker.sign_out().unwrap();
    assert!(vault.read_secret("google-identity").is_err());
}
