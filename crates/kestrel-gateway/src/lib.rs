//! RPC surface for Kestrel.
//!
//! Ties the vault, approval engine, and identity broker together behind a
//! single method-dispatch entry point ([`methods::Gateway::handle`]), with
//! a broadcast [`events::EventBus`] for approval lifecycle events and a
//! per-install rendezvous token for local frontend authentication.

pub mod error;
pub mod events;
pub mod methods;
pub mod providers;
pub mod token;

pub use error::{GatewayError, Result};
pub use events::{EventBus, GatewayEvent};
pub use methods::Gateway;
pub use providers::{PROVIDER_CATALOG, ProviderRegistry, ProviderStatus};
pub use token::{GATEWAY_TOKEN_ACCOUNT, resolve_gateway_token};
