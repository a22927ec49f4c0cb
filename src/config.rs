//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::secret::SecretString;
use crate::{Error, Result};

/// Environment variables understood without the `MCP_OBO_` prefix, and the
/// configuration key each one fills.
const CONVENTIONAL_ENV: &[(&str, &str)] = &[
    ("AZURE_CLIENT_ID", "identity.client_id"),
    ("AZURE_CLIENT_SECRET", "identity.client_secret"),
    ("AZURE_TENANT_ID", "identity.tenant_id"),
    ("OAUTH_ISSUER_URL", "oauth.issuer_url"),
    ("OAUTH_AUTHORIZE_URL", "oauth.authorization_url"),
    ("OAUTH_TOKEN_URL", "oauth.token_url"),
];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before placeholder expansion.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Service identity (the confidential client this server runs as)
    pub identity: IdentityConfig,
    /// Published OAuth endpoints
    pub oauth: OAuthConfig,
    /// Downstream API configuration
    pub downstream: DownstreamConfig,
    /// Exchanged-token cache
    pub token_cache: TokenCacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(30),
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

/// Service identity registered with the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Application (client) ID. Also the audience every inbound token must carry.
    pub client_id: String,
    /// Client secret used for on-behalf-of and client-credential grants
    pub client_secret: SecretString,
    /// Home tenant; used when a token carries no `tid` claim
    pub tenant_id: String,
    /// Identity provider host
    pub authority_host: String,
    /// The only signature algorithm accepted on inbound tokens
    pub algorithm: Algorithm,
    /// Clock skew tolerance for `exp`/`nbf` (seconds)
    pub leeway_secs: u64,
    /// How long a fetched signing key set is reused
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: SecretString::default(),
            tenant_id: String::new(),
            authority_host: "https://login.microsoftonline.com".to_string(),
            algorithm: Algorithm::RS256,
            leeway_secs: 60,
            jwks_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl IdentityConfig {
    /// Signing key discovery URL for a tenant
    #[must_use]
    pub fn jwks_uri(&self, tenant: &str) -> String {
        format!(
            "{}/{tenant}/discovery/v2.0/keys",
            self.authority_host.trim_end_matches('/')
        )
    }

    /// Token endpoint for a tenant
    #[must_use]
    pub fn token_endpoint(&self, tenant: &str) -> String {
        format!(
            "{}/{tenant}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/')
        )
    }
}

/// OAuth endpoints advertised to clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Issuer URL; must equal the public origin of this server
    pub issuer_url: String,
    /// Authorization endpoint clients are sent to
    pub authorization_url: String,
    /// Token endpoint clients redeem codes at
    pub token_url: String,
    /// Overrides the advertised scopes (empty = derived from the client ID)
    pub scopes_supported: Vec<String>,
}

impl OAuthConfig {
    /// Issuer without a trailing slash
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }

    /// Dynamic client registration endpoint
    #[must_use]
    pub fn registration_endpoint(&self) -> String {
        format!("{}/oauth/register", self.issuer())
    }
}

/// Downstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL every tool path is appended to
    pub base_url: String,
    /// Scopes requested for exchanged tokens
    pub scopes: Vec<String>,
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com".to_string(),
            scopes: vec!["https://graph.microsoft.com/.default".to_string()],
            timeout: Duration::from_secs(30),
        }
    }
}

/// Exchanged-token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// Reuse exchanged tokens until shortly before they expire
    pub enabled: bool,
    /// Entry ceiling; the cache is cleared of expired entries when reached
    pub max_entries: usize,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 1000,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();

        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        let prefixed = Env::prefixed("MCP_OBO_").split("__");

        // env_files feed the variables read below, so they load first
        let env_files: Vec<String> = figment
            .clone()
            .merge(prefixed.clone())
            .extract_inner("env_files")
            .unwrap_or_default();
        load_env_files(&env_files);

        let mut config: Self = conventional_env(figment)
            .merge(prefixed)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.expand_env_vars();

        Ok(config)
    }

    /// Check that every value the OAuth flows depend on is present and sane
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every missing or malformed setting.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let required = [
            ("identity.client_id (AZURE_CLIENT_ID)", self.identity.client_id.as_str()),
            ("identity.client_secret (AZURE_CLIENT_SECRET)", self.identity.client_secret.expose()),
            ("identity.tenant_id (AZURE_TENANT_ID)", self.identity.tenant_id.as_str()),
            ("oauth.issuer_url (OAUTH_ISSUER_URL)", self.oauth.issuer_url.as_str()),
            ("oauth.authorization_url (OAUTH_AUTHORIZE_URL)", self.oauth.authorization_url.as_str()),
            ("oauth.token_url (OAUTH_TOKEN_URL)", self.oauth.token_url.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{name} is required"));
            }
        }

        let urls = [
            ("identity.authority_host", self.identity.authority_host.as_str()),
            ("oauth.issuer_url", self.oauth.issuer_url.as_str()),
            ("downstream.base_url", self.downstream.base_url.as_str()),
        ];
        for (name, value) in urls {
            if !value.trim().is_empty() && Url::parse(value).is_err() {
                problems.push(format!("{name} is not a valid URL: {value}"));
            }
        }

        if is_symmetric(self.identity.algorithm) {
            problems.push(format!(
                "identity.algorithm {:?} is symmetric; signing keys are public keys",
                self.identity.algorithm
            ));
        }

        if self.downstream.scopes.is_empty() {
            problems.push("downstream.scopes must name at least one scope".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in identity and OAuth values
    fn expand_env_vars(&mut self) {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        for value in [
            &mut self.identity.client_id,
            &mut self.identity.tenant_id,
            &mut self.oauth.issuer_url,
            &mut self.oauth.authorization_url,
            &mut self.oauth.token_url,
        ] {
            *value = Self::expand_string(&re, value);
        }

        let secret = Self::expand_string(&re, self.identity.client_secret.expose());
        self.identity.client_secret = SecretString::new(secret);
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Load environment files into the process environment.
/// Supports ~ expansion. Files that don't exist are silently skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = if path_str.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                path_str.replacen('~', &home.display().to_string(), 1)
            } else {
                path_str.clone()
            }
        } else {
            path_str.clone()
        };

        let path = Path::new(&expanded);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        } else {
            tracing::debug!("Env file not found (skipped): {expanded}");
        }
    }
}

/// Merge the un-prefixed identity variables into `figment`.
///
/// Values are taken verbatim as strings; an all-digit secret or tenant must
/// not be parsed into a number.
fn conventional_env(figment: Figment) -> Figment {
    CONVENTIONAL_ENV
        .iter()
        .filter_map(|(var, key)| env::var(var).ok().map(|value| (*key, value)))
        .fold(figment, |figment, (key, value)| {
            figment.merge(Serialized::default(key, value))
        })
}

fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config {
        let mut config = Config::default();
        config.identity.client_id = "11111111-2222-3333-4444-555555555555".to_string();
        config.identity.client_secret = SecretString::new("secret");
        config.identity.tenant_id = "contoso-tenant".to_string();
        config.oauth.issuer_url = "https://mcp.example.com".to_string();
        config.oauth.authorization_url = "https://login.example.com/authorize".to_string();
        config.oauth.token_url = "https://login.example.com/token".to_string();
        config
    }

    #[test]
    fn defaults_target_graph_without_caching() {
        let config = Config::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.identity.algorithm, Algorithm::RS256);
        assert_eq!(config.downstream.base_url, "https://graph.microsoft.com");
        assert!(!config.token_cache.enabled);
    }

    #[test]
    fn conventional_variables_are_taken_as_strings() {
        figment::Jail::expect_with(|jail| {
            // GIVEN: the un-prefixed variables, with an all-digit secret and tenant
            jail.set_env("AZURE_CLIENT_ID", "11111111-2222-3333-4444-555555555555");
            jail.set_env("AZURE_CLIENT_SECRET", "12345");
            jail.set_env("AZURE_TENANT_ID", "2024");
            jail.set_env("OAUTH_ISSUER_URL", "https://mcp.example.com");
            jail.set_env("OAUTH_AUTHORIZE_URL", "https://login.example.com/authorize");
            jail.set_env("OAUTH_TOKEN_URL", "https://login.example.com/token");

            // WHEN
            let config = Config::load(None).map_err(|e| e.to_string())?;

            // THEN: every value lands on its key untouched
            assert_eq!(config.identity.client_id, "11111111-2222-3333-4444-555555555555");
            assert_eq!(config.identity.client_secret.expose(), "12345");
            assert_eq!(config.identity.tenant_id, "2024");
            assert_eq!(config.oauth.issuer_url, "https://mcp.example.com");
            assert_eq!(config.oauth.authorization_url, "https://login.example.com/authorize");
            assert_eq!(config.oauth.token_url, "https://login.example.com/token");
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn prefixed_variables_override_conventional_ones() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AZURE_TENANT_ID", "conventional");
            jail.set_env("MCP_OBO_IDENTITY__TENANT_ID", "prefixed");
            jail.set_env("MCP_OBO_SERVER__PORT", "8081");

            let config = Config::load(None).map_err(|e| e.to_string())?;

            assert_eq!(config.identity.tenant_id, "prefixed");
            assert_eq!(config.server.port, 8081);
            Ok(())
        });
    }

    #[test]
    fn env_files_are_loaded_before_extraction() {
        figment::Jail::expect_with(|jail| {
            // GIVEN: identity variables only present in an env file named by the config
            jail.create_file(
                "identity.env",
                "AZURE_CLIENT_ID=from-env-file\nAZURE_CLIENT_SECRET=0042\n",
            )?;
            jail.create_file("gateway.yaml", "env_files:\n  - identity.env\n")?;

            // WHEN
            let config =
                Config::load(Some(Path::new("gateway.yaml"))).map_err(|e| e.to_string())?;

            // THEN: they fill the identity section without any placeholder
            assert_eq!(config.identity.client_id, "from-env-file");
            assert_eq!(config.identity.client_secret.expose(), "0042");
            Ok(())
        });
    }

    #[test]
    fn validate_lists_every_missing_value() {
        // GIVEN: an empty configuration
        let err = Config::default().validate().unwrap_err().to_string();

        // THEN: each required setting is named
        assert!(err.contains("identity.client_id"));
        assert!(err.contains("identity.client_secret"));
        assert!(err.contains("identity.tenant_id"));
        assert!(err.contains("oauth.issuer_url"));
        assert!(err.contains("oauth.authorization_url"));
        assert!(err.contains("oauth.token_url"));
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn validate_rejects_symmetric_algorithm() {
        let mut config = complete();
        config.identity.algorithm = Algorithm::HS256;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("symmetric"));
    }

    #[test]
    fn validate_rejects_malformed_issuer() {
        let mut config = complete();
        config.oauth.issuer_url = "not a url".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn tenant_urls_are_built_from_authority_host() {
        let mut identity = IdentityConfig::default();
        identity.authority_host = "https://login.example.com/".to_string();

        assert_eq!(
            identity.jwks_uri("t1"),
            "https://login.example.com/t1/discovery/v2.0/keys"
        );
        assert_eq!(
            identity.token_endpoint("t1"),
            "https://login.example.com/t1/oauth2/v2.0/token"
        );
    }

    #[test]
    fn registration_endpoint_hangs_off_issuer() {
        let oauth = OAuthConfig {
            issuer_url: "https://mcp.example.com/".to_string(),
            ..OAuthConfig::default()
        };
        assert_eq!(
            oauth.registration_endpoint(),
            "https://mcp.example.com/oauth/register"
        );
    }

    #[test]
    fn expand_string_uses_default_when_unset() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let out = Config::expand_string(&re, "${MCP_OBO_TEST_SURELY_UNSET:-fallback}");
        assert_eq!(out, "fallback");
    }

    #[test]
    fn debug_output_hides_client_secret() {
        let rendered = format!("{:?}", complete());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("[REDACTED]"));
    }
}
