//! OAuth metadata documents published by this server
//!
//! Implements RFC 8414 (Authorization Server Metadata) and RFC 9728
//! (Protected Resource Metadata). Both are pure functions of configuration.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::Config;

/// OAuth Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Authorization server issuer URL
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Dynamic client registration endpoint
    pub registration_endpoint: String,

    /// Supported response types
    pub response_types_supported: Vec<String>,

    /// Supported grant types
    pub grant_types_supported: Vec<String>,

    /// Supported token endpoint auth methods
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported scopes (may be string or array when read back)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,

    /// Authorization servers that can issue tokens for this resource
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// Supported bearer token methods
    #[serde(default)]
    pub bearer_methods_supported: Vec<String>,

    /// Supported scopes
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

/// Deserialize scopes that may be either a string or array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Scopes advertised to clients: configured override, else the standard set
/// plus this API's `mcp` scope
#[must_use]
pub fn supported_scopes(config: &Config) -> Vec<String> {
    if !config.oauth.scopes_supported.is_empty() {
        return config.oauth.scopes_supported.clone();
    }

    let mut scopes = strings(&["openid", "profile", "email", "User.Read", "offline_access"]);
    scopes.push(format!("api://{}/mcp", config.identity.client_id));
    scopes
}

impl AuthorizationServerMetadata {
    /// Metadata derived from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            issuer: config.oauth.issuer_url.clone(),
            authorization_endpoint: config.oauth.authorization_url.clone(),
            token_endpoint: config.oauth.token_url.clone(),
            registration_endpoint: config.oauth.registration_endpoint(),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&[
                "authorization_code",
                "refresh_token",
                "client_credentials",
            ]),
            token_endpoint_auth_methods_supported: strings(&["client_secret_basic"]),
            scopes_supported: supported_scopes(config),
        }
    }
}

impl ProtectedResourceMetadata {
    /// Metadata for the `/mcp` endpoint derived from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let issuer = config.oauth.issuer();
        Self {
            resource: format!("{issuer}/mcp"),
            authorization_servers: vec![issuer.to_string()],
            bearer_methods_supported: strings(&["header"]),
            scopes_supported: supported_scopes(config),
        }
    }

    /// Where this document is served; referenced from `WWW-Authenticate`
    #[must_use]
    pub fn url(config: &Config) -> String {
        format!(
            "{}/.well-known/oauth-protected-resource",
            config.oauth.issuer()
        )
    }
}
