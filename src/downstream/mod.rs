//! Downstream API access
//!
//! [`Connector`] builds an [`ApiClient`] per use: one acting as the caller of
//! the current request (on-behalf-of), or one acting as the service itself.

mod client;

pub use client::ApiClient;

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::auth::RequestContext;
use crate::config::DownstreamConfig;
use crate::oauth::{ClientSecretCredential, OnBehalfOfCredential, TokenCache, TokenEndpoint};

/// Quote `value` as an OData string literal for use inside a `$filter`
/// query parameter: single quotes doubled, then percent-encoded.
#[must_use]
pub fn odata_string(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    let encoded: String = url::form_urlencoded::byte_serialize(escaped.as_bytes()).collect();
    // byte_serialize writes spaces as '+'; a literal '+' is already %2B
    format!("'{}'", encoded.replace('+', "%20"))
}

/// Bytes escaped in a path segment: everything except RFC 3986 `pchar`
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// Percent-encode `value` for use as one URL path segment
#[must_use]
pub fn path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// Shared factory for downstream clients
pub struct Connector {
    http: reqwest::Client,
    config: DownstreamConfig,
    endpoint: Arc<TokenEndpoint>,
    cache: Option<Arc<TokenCache>>,
}

impl Connector {
    /// Create a connector; `cache` is only consulted for delegated tokens
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        config: DownstreamConfig,
        endpoint: Arc<TokenEndpoint>,
        cache: Option<Arc<TokenCache>>,
    ) -> Self {
        Self {
            http,
            config,
            endpoint,
            cache,
        }
    }

    /// Client acting as the caller of `context`
    #[must_use]
    pub fn on_behalf_of(&self, context: &RequestContext) -> ApiClient {
        let credential =
            OnBehalfOfCredential::new(self.endpoint.clone(), context.clone(), self.cache.clone());
        self.client(Arc::new(credential), self.config.scopes.clone())
    }

    /// Client acting as the service, scoped to the API's `/.default`
    #[must_use]
    pub fn as_service(&self) -> ApiClient {
        let credential = ClientSecretCredential::new(self.endpoint.clone());
        self.client(Arc::new(credential), vec![self.default_scope()])
    }

    fn client(
        &self,
        credential: Arc<dyn crate::oauth::TokenCredential>,
        scopes: Vec<String>,
    ) -> ApiClient {
        ApiClient::new(self.http.clone(), self.config.base_url.clone(), credential, scopes)
            .with_timeout(self.config.timeout)
    }

    /// `https://graph.microsoft.com/.default` for the default base URL
    fn default_scope(&self) -> String {
        self.config
            .scopes
            .iter()
            .find(|s| s.ends_with("/.default"))
            .cloned()
            .unwrap_or_else(|| format!("{}/.default", self.config.base_url.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;

    fn connector(config: DownstreamConfig) -> Connector {
        let endpoint = Arc::new(TokenEndpoint::new(
            reqwest::Client::new(),
            IdentityConfig::default(),
        ));
        Connector::new(reqwest::Client::new(), config, endpoint, None)
    }

    #[test]
    fn odata_string_escapes_quotes_and_reserved_characters() {
        assert_eq!(odata_string("Documents"), "'Documents'");
        assert_eq!(odata_string("Bob's list"), "'Bob%27%27s%20list'");
        assert_eq!(odata_string("a&b+c#d"), "'a%26b%2Bc%23d'");
    }

    #[test]
    fn path_segment_keeps_site_ids_and_escapes_separators() {
        assert_eq!(
            path_segment("contoso.sharepoint.com,1234-ab,5678-cd"),
            "contoso.sharepoint.com,1234-ab,5678-cd"
        );
        assert_eq!(path_segment("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(path_segment("My List"), "My%20List");
        assert_eq!(path_segment("Ärende"), "%C3%84rende");
    }

    #[test]
    fn service_scope_prefers_configured_default_scope() {
        let connector = connector(DownstreamConfig::default());
        assert_eq!(connector.default_scope(), "https://graph.microsoft.com/.default");
    }

    #[test]
    fn service_scope_derives_from_base_url() {
        let connector = connector(DownstreamConfig {
            base_url: "http://127.0.0.1:9999/".to_string(),
            scopes: vec!["User.Read".to_string()],
            ..DownstreamConfig::default()
        });
        assert_eq!(connector.default_scope(), "http://127.0.0.1:9999/.default");
    }
}
