//! Token acquisition from the identity provider's v2.0 token endpoint
//!
//! Two grants are used:
//! - on-behalf-of (`urn:ietf:params:oauth:grant-type:jwt-bearer`), which
//!   trades the caller's bearer token for a downstream token that acts as them
//! - client credentials, for calls made as the service itself

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::cache::{CacheKey, TokenCache};
use super::token::{AccessToken, TokenCredential, TokenErrorResponse, TokenResponse};
use crate::auth::RequestContext;
use crate::config::IdentityConfig;
use crate::{Error, Result};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Confidential client talking to the token endpoint.
///
/// Shared by every credential; holds the service's own client ID and secret.
pub struct TokenEndpoint {
    http: reqwest::Client,
    identity: IdentityConfig,
}

impl TokenEndpoint {
    /// Create a token endpoint client for the service identity
    #[must_use]
    pub fn new(http: reqwest::Client, identity: IdentityConfig) -> Self {
        Self { http, identity }
    }

    /// The service's home tenant
    #[must_use]
    pub fn home_tenant(&self) -> &str {
        &self.identity.tenant_id
    }

    /// POST a grant to the tenant's token endpoint.
    ///
    /// `client_id` and `client_secret` are added to `grant`.
    async fn request(&self, tenant: &str, grant: &[(&str, &str)]) -> Result<AccessToken> {
        let endpoint = self.identity.token_endpoint(tenant);

        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.identity.client_id.as_str()),
            ("client_secret", self.identity.client_secret.expose()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .http
            .post(&endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Delegation(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            let reason = body
                .describe()
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!(tenant = %tenant, status = status.as_u16(), "Token request rejected");
            return Err(Error::Delegation(reason));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Delegation(format!("unreadable token response: {e}")))?;

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Delegation("token response has no access_token".to_string()))?;

        Ok(AccessToken::from_response(access_token, body.expires_in))
    }
}

/// Acts as the caller of one request against the downstream API
pub struct OnBehalfOfCredential {
    endpoint: Arc<TokenEndpoint>,
    context: RequestContext,
    cache: Option<Arc<TokenCache>>,
}

impl OnBehalfOfCredential {
    /// Credential exchanging `context.bearer` for downstream tokens
    #[must_use]
    pub fn new(
        endpoint: Arc<TokenEndpoint>,
        context: RequestContext,
        cache: Option<Arc<TokenCache>>,
    ) -> Self {
        Self {
            endpoint,
            context,
            cache,
        }
    }

    fn cache_key(&self, scopes: &[String]) -> CacheKey {
        let identity = &self.context.identity;
        CacheKey::new(&identity.tenant_id, &identity.principal_key(), scopes)
    }
}

#[async_trait]
impl TokenCredential for OnBehalfOfCredential {
    async fn get_token(&self, scopes: &[String]) -> Result<AccessToken> {
        if let Some(cache) = &self.cache {
            if let Some(token) = cache.get(&self.cache_key(scopes)) {
                debug!(subject = %self.context.identity.subject, "Using cached exchanged token");
                return Ok(token);
            }
        }

        let tenant = self.context.identity.tenant_id.as_str();
        let scope = scopes.join(" ");
        debug!(tenant = %tenant, subject = %self.context.identity.subject, scope = %scope, "On-behalf-of exchange");

        let token = self
            .endpoint
            .request(
                tenant,
                &[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", self.context.bearer.expose()),
                    ("scope", scope.as_str()),
                    ("requested_token_use", "on_behalf_of"),
                ],
            )
            .await?;

        if let Some(cache) = &self.cache {
            cache.insert(self.cache_key(scopes), token.clone());
        }

        Ok(token)
    }
}

/// Acts as the service itself (app-only)
pub struct ClientSecretCredential {
    endpoint: Arc<TokenEndpoint>,
}

impl ClientSecretCredential {
    /// Credential for the service identity's home tenant
    #[must_use]
    pub fn new(endpoint: Arc<TokenEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scopes: &[String]) -> Result<AccessToken> {
        let tenant = self.endpoint.home_tenant().to_string();
        let scope = scopes.join(" ");
        debug!(tenant = %tenant, scope = %scope, "Client credentials grant");

        self.endpoint
            .request(
                &tenant,
                &[("grant_type", "client_credentials"), ("scope", scope.as_str())],
            )
            .await
    }
}
