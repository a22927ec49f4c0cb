//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use super::auth::{AuthGate, auth_middleware};
use super::mcp::{McpHandler, error_response, parse_request};
use crate::auth::RequestContext;
use crate::config::Config;
use crate::downstream::Connector;
use crate::oauth::{
    AuthorizationServerMetadata, ProtectedResourceMetadata, RegistrationRequest, registration,
};
use crate::Error;

/// Shared application state
pub struct AppState {
    /// Effective configuration
    pub config: Config,
    /// Request gate for `/mcp`
    pub gate: Arc<AuthGate>,
    /// MCP method handler
    pub mcp: McpHandler,
    /// Downstream client factory
    pub connector: Arc<Connector>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gate = Arc::clone(&state.gate);
    let max_body_size = state.config.server.max_body_size;
    let request_timeout = state.config.server.request_timeout;

    let protected = Router::new()
        .route("/mcp", post(mcp_handler))
        .route_layer(middleware::from_fn_with_state(gate, auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata_handler),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata_handler),
        )
        .route("/oauth/register", post(register_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /.well-known/oauth-authorization-server
async fn authorization_server_metadata_handler(
    State(state): State<Arc<AppState>>,
) -> Json<AuthorizationServerMetadata> {
    Json(AuthorizationServerMetadata::from_config(&state.config))
}

/// GET /.well-known/oauth-protected-resource
async fn protected_resource_metadata_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ProtectedResourceMetadata> {
    Json(ProtectedResourceMetadata::from_config(&state.config))
}

/// POST /oauth/register
async fn register_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // An empty or unreadable body registers nothing new
    let request: RegistrationRequest = serde_json::from_slice(&body).unwrap_or_default();

    let service = state.connector.as_service();
    match registration::register(&service, &state.config.identity, request).await {
        Ok(registered) => {
            info!(redirect_uris = registered.redirect_uris.len(), "Client registered");
            Json(registered).into_response()
        }
        Err(e) => {
            error!(error = %e, "Client registration failed");
            let description = match e {
                Error::Registration(message) => message,
                other => other.to_string(),
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "registration_failed",
                    "error_description": description,
                })),
            )
                .into_response()
        }
    }
}

/// POST /mcp (behind the gate)
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    body: Bytes,
) -> Response {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Unparseable JSON-RPC body");
            let response = error_response(None, &Error::from(e));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let parsed = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };

    if parsed.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    let Some(id) = parsed.id else {
        let response = error_response(None, &Error::Protocol("Missing id".to_string()));
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    };

    let response = state
        .mcp
        .handle(ctx, id, &parsed.method, parsed.params)
        .await;
    Json(response).into_response()
}
