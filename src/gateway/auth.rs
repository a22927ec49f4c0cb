//! Request gate for protected endpoints
//!
//! - No `Authorization` header: 401, JSON-RPC code `-32001`
//! - Token present but rejected by the verifier: 401, JSON-RPC code `-32003`
//! - Token valid: a [`RequestContext`] is attached to the request extensions

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::auth::{RequestContext, TokenVerifier};
use crate::error::rpc_codes;
use crate::protocol::JsonRpcResponse;

/// Message for a request without credentials
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication token required";
/// Message for a request whose token failed verification
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid authentication token";

/// Verifier plus the challenge advertised on 401 responses
pub struct AuthGate {
    verifier: TokenVerifier,
    challenge: HeaderValue,
}

impl AuthGate {
    /// Gate using `verifier`; `resource_metadata_url` is named in `WWW-Authenticate`
    #[must_use]
    pub fn new(verifier: TokenVerifier, resource_metadata_url: &str) -> Self {
        let challenge = HeaderValue::from_str(&format!(
            "Bearer resource_metadata=\"{resource_metadata_url}\""
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer"));
        Self {
            verifier,
            challenge,
        }
    }

    fn unauthorized(&self, code: i32, message: &str) -> Response {
        let body = JsonRpcResponse::error(None, code, message);
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, self.challenge.clone());
        response
    }
}

/// Bearer token in the `Authorization` header.
///
/// `None` when the header is absent or empty. A value without the `Bearer `
/// scheme is returned whole and left to the verifier to reject.
fn bearer_token(request: &Request<Body>) -> Option<&str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();

    if value.is_empty() {
        return None;
    }

    Some(
        value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim(),
    )
}

/// Authentication middleware
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(&request).map(String::from) else {
        warn!(path = %path, "Missing Authorization header");
        return gate.unauthorized(rpc_codes::AUTH_REQUIRED, AUTH_REQUIRED_MESSAGE);
    };

    let verification = gate.verifier.validate(&token).await;
    let Some(identity) = verification.claims.filter(|_| verification.is_valid) else {
        warn!(path = %path, "Invalid token");
        return gate.unauthorized(rpc_codes::INVALID_TOKEN, INVALID_TOKEN_MESSAGE);
    };

    debug!(subject = %identity.subject, tenant = %identity.tenant_id, path = %path, "Authenticated request");
    request
        .extensions_mut()
        .insert(RequestContext::new(identity, token));
    next.run(request).await
}
