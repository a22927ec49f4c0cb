//! Per-request caller identity

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

use super::VerifiedIdentity;
use crate::secret::SecretString;

/// The verified caller of one request.
///
/// Inserted into the request extensions by the gate and handed by value to
/// the dispatcher and every tool handler. Nothing outlives the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Claims of the verified bearer token
    pub identity: Arc<VerifiedIdentity>,
    /// The raw bearer token, presented as the user assertion in delegated exchanges
    pub bearer: SecretString,
}

impl RequestContext {
    /// Build a context from a verified token
    #[must_use]
    pub fn new(identity: VerifiedIdentity, bearer: impl Into<SecretString>) -> Self {
        Self {
            identity: Arc::new(identity),
            bearer: bearer.into(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only reachable on routes mounted without the gate
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "Unauthenticated request"))
    }
}
