//! Shared fixtures: an in-process identity provider plus downstream API, a
//! test configuration pointing at it, and token minting.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Form, Json, Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, Method, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use mcp_obo_gateway::config::Config;
use mcp_obo_gateway::secret::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const CLIENT_SECRET: &str = "service-secret";
pub const TENANT: &str = "contoso-tenant";
pub const ISSUER: &str = "https://mcp.example.com";

pub const OBO_TOKEN: &str = "graph-token-for-user";
pub const APP_TOKEN: &str = "graph-token-for-service";

const PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/rsa_private.pem");
const OTHER_PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/rsa_other_private.pem");
const PUBLIC_JWK: &str = include_str!("../fixtures/rsa_public.jwk.json");

/// One request seen by the downstream API
#[derive(Debug, Clone)]
pub struct DownstreamCall {
    pub method: Method,
    pub uri: String,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Everything the mock upstream has been asked, plus canned answers
#[derive(Default)]
pub struct UpstreamState {
    pub key_fetches: AtomicUsize,
    pub token_requests: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub downstream_calls: Mutex<Vec<DownstreamCall>>,
    pub reject_delegation: AtomicBool,
    routes: Mutex<HashMap<(Method, String), (StatusCode, Value)>>,
}

/// Identity provider and downstream API on one local port
pub struct Upstream {
    pub base_url: String,
    pub state: Arc<UpstreamState>,
}

impl Upstream {
    pub async fn start() -> Self {
        let state = Arc::new(UpstreamState::default());
        let router = Router::new()
            .route("/{tenant}/discovery/v2.0/keys", get(keys))
            .route("/{tenant}/oauth2/v2.0/token", post(token))
            .fallback(downstream)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Answer `method path` (query ignored) with `status` and `body`
    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert((method, path.to_string()), (status, body));
    }

    pub fn downstream_calls(&self) -> Vec<DownstreamCall> {
        self.state.downstream_calls.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> Vec<(String, HashMap<String, String>)> {
        self.state.token_requests.lock().unwrap().clone()
    }

    /// Gateway configuration whose identity provider and downstream API are this server
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.identity.client_id = CLIENT_ID.to_string();
        config.identity.client_secret = SecretString::new(CLIENT_SECRET);
        config.identity.tenant_id = TENANT.to_string();
        config.identity.authority_host = self.base_url.clone();
        config.oauth.issuer_url = ISSUER.to_string();
        config.oauth.authorization_url = format!("{}/{TENANT}/oauth2/v2.0/authorize", self.base_url);
        config.oauth.token_url = format!("{}/{TENANT}/oauth2/v2.0/token", self.base_url);
        config.downstream.base_url = self.base_url.clone();
        config
    }

    pub fn app(&self) -> Router {
        mcp_obo_gateway::gateway::build_app(&self.config()).unwrap()
    }
}

async fn keys(State(state): State<Arc<UpstreamState>>, Path(_tenant): Path<String>) -> Json<Value> {
    state.key_fetches.fetch_add(1, Ordering::SeqCst);
    let jwk: Value = serde_json::from_str(PUBLIC_JWK).unwrap();
    Json(json!({ "keys": [jwk] }))
}

async fn token(
    State(state): State<Arc<UpstreamState>>,
    Path(tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let grant = form.get("grant_type").cloned().unwrap_or_default();
    state.token_requests.lock().unwrap().push((tenant, form));

    if grant == "client_credentials" {
        return Json(json!({"access_token": APP_TOKEN, "expires_in": 3599, "token_type": "Bearer"}))
            .into_response();
    }

    if state.reject_delegation.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50013: Assertion failed signature validation."
            })),
        )
            .into_response();
    }

    Json(json!({"access_token": OBO_TOKEN, "expires_in": 3599, "token_type": "Bearer"}))
        .into_response()
}

async fn downstream(
    State(state): State<Arc<UpstreamState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    state.downstream_calls.lock().unwrap().push(DownstreamCall {
        method: method.clone(),
        uri: uri.to_string(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string()),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let canned = state.routes.lock().unwrap().get(&(method, path)).cloned();
    match canned {
        Some((status, _)) if status == StatusCode::NO_CONTENT => status.into_response(),
        Some((status, body)) => (status, Json(body)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": "itemNotFound"}})),
        )
            .into_response(),
    }
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Claims of a valid delegated token for this service
pub fn user_claims() -> Value {
    json!({
        "sub": "user-sub",
        "oid": "user-oid",
        "tid": TENANT,
        "aud": CLIENT_ID,
        "iss": format!("https://login.microsoftonline.com/{TENANT}/v2.0"),
        "iat": now(),
        "exp": now() + 3600,
        "name": "Alice Example",
        "preferred_username": "alice@contoso.com",
        "scp": "mcp"
    })
}

fn sign(pem: &[u8], kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

/// Token signed by the published key
pub fn mint(claims: &Value) -> String {
    sign(PRIVATE_KEY, "test-key-1", claims)
}

/// Token signed by the published key but naming `kid`
pub fn mint_with_kid(kid: &str, claims: &Value) -> String {
    sign(PRIVATE_KEY, kid, claims)
}

/// Token signed by a key the identity provider never published
pub fn mint_with_unpublished_key(kid: &str, claims: &Value) -> String {
    sign(OTHER_PRIVATE_KEY, kid, claims)
}

/// POST a JSON-RPC message to `/mcp`
pub async fn post_mcp(app: Router, token: Option<&str>, message: &Value) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    send(app, builder.body(Body::from(message.to_string())).unwrap()).await
}

/// Send `request` and split the response into status, headers and JSON body
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

/// `tools/call` message
pub fn call_tool(name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    })
}
