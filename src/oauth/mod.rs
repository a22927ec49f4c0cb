//! OAuth surfaces of the gateway
//!
//! - Delegated (on-behalf-of) and service token acquisition
//! - Optional exchanged-token cache
//! - Authorization server and protected resource metadata (RFC 8414, RFC 9728)
//! - Dynamic client registration against the service's own app registration

mod cache;
mod credential;
mod metadata;
pub mod registration;
mod token;

pub use cache::{CacheKey, TokenCache};
pub use credential::{ClientSecretCredential, OnBehalfOfCredential, TokenEndpoint};
pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata, supported_scopes};
pub use registration::{RegistrationRequest, RegistrationResponse};
pub use token::{AccessToken, TokenCredential};
