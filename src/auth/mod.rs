//! Inbound bearer-token authentication
//!
//! - [`SigningKeyResolver`] fetches per-tenant signing keys (JWKS)
//! - [`TokenVerifier`] checks signature, algorithm, audience and expiry
//! - [`RequestContext`] carries the verified caller through one request

mod context;
mod jwks;
mod verifier;

pub use context::RequestContext;
pub use jwks::SigningKeyResolver;
pub use verifier::{TokenVerifier, VerifiedIdentity, Verification};

use thiserror::Error;

/// Reasons a bearer token is rejected
///
/// Never crosses the request gate; clients only ever see `-32003`.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token could not be decoded, or a required header field/claim is missing
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The tenant's key set has no usable key with this id
    #[error("No signing key '{kid}' published for tenant '{tenant}'")]
    KeyNotFound {
        /// Tenant whose key set was searched
        tenant: String,
        /// Key id from the token header
        kid: String,
    },

    /// The key set could not be fetched or parsed
    #[error("Signing key fetch failed: {0}")]
    KeyFetchFailed(String),

    /// Signature, algorithm, audience or expiry check failed
    #[error("Token rejected: {0}")]
    TokenInvalid(#[from] jsonwebtoken::errors::Error),
}
