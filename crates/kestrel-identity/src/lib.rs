//! OAuth2 PKCE identity broker for Kestrel.
//!
//! Implements the authorization code flow with PKCE (RFC 7636) against a
//! loopback redirect, persisting access/refresh tokens and the resulting
//! identity record in the encrypted [`kestrel_vault`] store. One identity
//! per install; refresh is automatic and soft-degrading.

pub mod broker;
pub mod error;
pub mod http;
pub mod pkce;

pub use broker::{
    DEFAULT_SIGN_IN_TIMEOUT, IdentityBroker, IdentityConfig, IdentityRecord, SignInStart,
};
pub use error::{IdentityError, Result};
pub use http::{OAuthConfig, OAuthHttp, REFRESH_SKEW_MS, RefreshGrant, TokenGrant, UserProfile};
