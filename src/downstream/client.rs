//! Authenticated JSON client for the downstream API
//!
//! # Security
//!
//! - A token is acquired from the credential for every call
//! - Tokens are NEVER logged or included in error messages
//! - Error bodies from the API are not echoed back to callers

use std::sync::Arc;
use std::time::Duration;

use reqwest::{
    Client, Method, Response, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::oauth::TokenCredential;
use crate::{Error, Result};

/// Minimal GET/POST/PATCH client against a fixed base URL
pub struct ApiClient {
    http: Client,
    base_url: String,
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    timeout: Duration,
}

impl ApiClient {
    /// Create a client that authenticates every call with `credential`
    #[must_use]
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            scopes,
            timeout: Duration::from_secs(30),
        }
    }

    /// Per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `GET {base}{endpoint}`
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.call(Method::GET, endpoint, None::<&()>).await
    }

    /// `POST {base}{endpoint}` with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        self.call(Method::POST, endpoint, Some(body)).await
    }

    /// `PATCH {base}{endpoint}` with a JSON body
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        self.call(Method::PATCH, endpoint, Some(body)).await
    }

    /// Profile of the signed-in user
    pub async fn current_user(&self) -> Result<Value> {
        self.get("/v1.0/me").await
    }

    async fn call<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let token = self.credential.get_token(&self.scopes).await?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.token.expose()))
            .map_err(|_| Error::Delegation("access token is not a valid header value".to_string()))?;

        let url = format!("{}{endpoint}", self.base_url);
        debug!(method = %method, endpoint = %endpoint, "Downstream call");

        let mut request = self
            .http
            .request(method, &url)
            .header(AUTHORIZATION, bearer)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        handle_response(response, endpoint).await
    }
}

/// Map non-2xx to [`Error::Downstream`] and an empty or 204 body to `{}`
async fn handle_response<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        warn!(status = status.as_u16(), endpoint = %endpoint, "Downstream call failed");
        return Err(Error::Downstream {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }

    let bytes = response.bytes().await?;
    if status == StatusCode::NO_CONTENT || bytes.is_empty() {
        return Ok(serde_json::from_value(Value::Object(Map::new()))?);
    }

    Ok(serde_json::from_slice(&bytes)?)
}
