//! HTTP side of the authorization code flow: building the consent URL,
//! exchanging codes, refreshing access tokens, and fetching the user's
//! profile.
//!
//! Endpoints default to Google's OAuth2 surface but are configurable, so
//! tests (and future providers) can point the client elsewhere.

use serde::Deserialize;
use url::Url;

use crate::error::{IdentityError, Result};
use crate::pkce;

/// How long before nominal expiry a token is treated as expired. Keeps a
/// token from dying mid-request and gives the refresh path headroom.
pub const REFRESH_SKEW_MS: i64 = 5 * 60 * 1000;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo?alt=json";

/// OAuth endpoint set and client identity.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Google endpoints with the identity scopes the broker needs.
    pub fn google(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        }
    }
}

/// Result of exchanging an authorization code.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Wall-clock expiry with [`REFRESH_SKEW_MS`] already subtracted.
    pub expires_at_ms: i64,
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub access_token: String,
    pub expires_at_ms: i64,
}

/// The user profile fields the broker keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
    id: Option<String>,
}

/// Stateless OAuth HTTP client. Flow state (verifier, state, redirect URI)
/// is passed explicitly by the broker.
#[derive(Clone)]
pub struct OAuthHttp {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthHttp {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the consent URL the user's browser should visit.
    ///
    /// Requests offline access with a forced consent prompt so the server
    /// issues a refresh token even for repeat sign-ins.
    pub fn authorization_url(
        &self,
        state: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        let mut url = Url::parse(&self.config.auth_url)?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("response_type", "code");
            params.append_pair("scope", &self.config.scopes.join(" "));
            params.append_pair("state", state);
            params.append_pair("code_challenge", &pkce::challenge(verifier));
            params.append_pair("code_challenge_method", "S256");
            params.append_pair("access_type", "offline");
            params.append_pair("prompt", "consent");
            params.append_pair("include_granted_scopes", "true");
        }
        Ok(url.to_string())
    }

    /// Exchange an authorization code plus its PKCE verifier for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ];
        tracing::debug!(token_url = %self.config.token_url, "exchanging authorization code");
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;
        let parsed = Self::parse_token_response(response).await?;
        let (access_token, expires_at_ms) = validate_token_fields(&parsed)?;
        Ok(TokenGrant {
            access_token,
            refresh_token: parsed
                .refresh_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            expires_at_ms,
        })
    }

    /// Obtain a fresh access token from a refresh token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshGrant> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        tracing::debug!(token_url = %self.config.token_url, "refreshing access token");
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;
        let parsed = Self::parse_token_response(response).await?;
        let (access_token, expires_at_ms) = validate_token_fields(&parsed)?;
        Ok(RefreshGrant {
            access_token,
            expires_at_ms,
        })
    }

    /// Fetch the signed-in user's profile with a bearer token.
    pub async fn fetch_user_info(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::TokenEndpoint {
                status: status.as_u16(),
                reason: format!("userinfo failed: {body}"),
            });
        }
        let parsed: UserInfoResponse = response.json().await?;
        let email = parsed
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| IdentityError::FlowFailed {
                reason: "userinfo did not include an email".to_string(),
            })?;
        Ok(UserProfile {
            email,
            name: non_empty(parsed.name),
            picture: non_empty(parsed.picture),
            id: non_empty(parsed.id),
        })
    }

    async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(error) if error.error == "invalid_grant" => Err(IdentityError::InvalidGrant {
                reason: error.error_description.unwrap_or(error.error),
            }),
            Ok(error) => Err(IdentityError::TokenEndpoint {
                status: status.as_u16(),
                reason: error.error_description.unwrap_or(error.error),
            }),
            Err(_) => Err(IdentityError::TokenEndpoint {
                status: status.as_u16(),
                reason: body,
            }),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Reject token responses without a usable access token or expiry, and
/// convert `expires_in` into a skewed wall-clock deadline.
fn validate_token_fields(parsed: &TokenResponse) -> Result<(String, i64)> {
    let access_token = parsed
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| IdentityError::FlowFailed {
            reason: "token endpoint returned no access token".to_string(),
        })?;
    let expires_in = parsed.expires_in.unwrap_or(0);
    if expires_in <= 0 {
        return Err(IdentityError::FlowFailed {
            reason: "token endpoint returned no expiry".to_string(),
        });
    }
    let expires_at_ms =
        chrono::Utc::now().timestamp_millis() + (expires_in * 1000 - REFRESH_SKEW_MS).max(0);
    Ok((access_token.to_string(), expires_at_ms))
}
