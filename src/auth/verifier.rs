//! Bearer token verification.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header and payload without verification to read `kid`,
//!    `alg` and the tenant (`tid`, else the tenant segment of `iss`, else the
//!    configured home tenant).
//! 2. Reject any token whose `alg` differs from the configured algorithm.
//!    The token's own `alg` never selects the verification algorithm.
//! 3. Resolve the signing key for `(tenant, kid)`.
//! 4. Verify the signature, `exp` (with leeway) and that `aud` equals the
//!    service's client ID.
//!
//! Every failure fails closed: [`TokenVerifier::validate`] reports
//! `is_valid = false` and never returns an error.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, TokenData, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::AuthError;
use super::jwks::SigningKeyResolver;
use crate::config::IdentityConfig;

/// Decoded, signature-checked claim set of an inbound bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// `sub` claim
    pub subject: String,
    /// `oid` claim (directory object id of the user), when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Tenant whose key signed the token
    pub tenant_id: String,
    /// `iss` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `preferred_username` (or `upn` for v1 tokens)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Delegated scopes from `scp`
    #[serde(default)]
    pub scopes: Vec<String>,
    /// `exp` (Unix seconds)
    pub expires_at: u64,
    /// Full claim set
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl VerifiedIdentity {
    /// Stable key for per-principal state: tenant plus object id (or subject)
    #[must_use]
    pub fn principal_key(&self) -> String {
        let who = self.object_id.as_deref().unwrap_or(&self.subject);
        format!("{}:{who}", self.tenant_id)
    }

    fn from_claims(tenant_id: String, claims: Map<String, Value>) -> Result<Self, AuthError> {
        let text = |name: &str| claims.get(name).and_then(Value::as_str).map(String::from);

        let subject = text("sub")
            .ok_or_else(|| AuthError::MalformedToken("missing 'sub' claim".to_string()))?;
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_u64)
            .ok_or_else(|| AuthError::MalformedToken("missing 'exp' claim".to_string()))?;
        let scopes = text("scp")
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        Ok(Self {
            subject,
            object_id: text("oid"),
            tenant_id,
            issuer: text("iss"),
            name: text("name"),
            username: text("preferred_username").or_else(|| text("upn")),
            scopes,
            expires_at,
            claims,
        })
    }
}

/// Outcome of [`TokenVerifier::validate`].
#[derive(Debug, Clone)]
pub struct Verification {
    /// Whether every check passed
    pub is_valid: bool,
    /// The verified claims, present only when `is_valid`
    pub claims: Option<VerifiedIdentity>,
}

/// Claims read before the signature is checked; only used to pick the key.
#[derive(Debug, Default, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    iss: Option<String>,
}

/// Verifies inbound bearer tokens against the tenant's published keys.
pub struct TokenVerifier {
    resolver: SigningKeyResolver,
    client_id: String,
    home_tenant: String,
    algorithm: Algorithm,
    leeway: u64,
}

impl TokenVerifier {
    /// Create a verifier for the service described by `identity`.
    #[must_use]
    pub fn new(http: reqwest::Client, identity: &IdentityConfig) -> Self {
        Self {
            resolver: SigningKeyResolver::new(http, identity),
            client_id: identity.client_id.clone(),
            home_tenant: identity.tenant_id.clone(),
            algorithm: identity.algorithm,
            leeway: identity.leeway_secs,
        }
    }

    /// Verify `token`, collapsing every failure into `is_valid = false`.
    pub async fn validate(&self, token: &str) -> Verification {
        match self.verify(token).await {
            Ok(identity) => Verification {
                is_valid: true,
                claims: Some(identity),
            },
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                Verification {
                    is_valid: false,
                    claims: None,
                }
            }
        }
    }

    /// Verify `token` and return its identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] describing the first check that failed.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| {
                AuthError::MalformedToken("JWT missing 'kid' field in header".to_string())
            })?;

        if header.alg != self.algorithm {
            return Err(AuthError::TokenInvalid(ErrorKind::InvalidAlgorithm.into()));
        }

        let unverified = extract_unverified_claims(token)?;
        let tenant = self.tenant_for(&unverified)?;
        debug!(tenant = %tenant, kid = %kid, "Resolving signing key");

        let key = self.resolver.resolve(&tenant, &kid).await?;

        let token_data: TokenData<Map<String, Value>> =
            jsonwebtoken::decode(token, &key, &self.validation())?;

        VerifiedIdentity::from_claims(tenant, token_data.claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway;
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        validation
    }

    /// Tenant whose key set must contain the signing key.
    fn tenant_for(&self, claims: &UnverifiedClaims) -> Result<String, AuthError> {
        let tenant = claims
            .tid
            .clone()
            .or_else(|| claims.iss.as_deref().and_then(tenant_from_issuer))
            .unwrap_or_else(|| self.home_tenant.clone());

        if is_valid_tenant(&tenant) {
            Ok(tenant)
        } else {
            Err(AuthError::MalformedToken(format!(
                "unusable tenant identifier '{tenant}'"
            )))
        }
    }
}

/// Extract claims from a JWT without signature verification.
///
/// Used only to pick the tenant before we know which key to use.
fn extract_unverified_claims(token: &str) -> Result<UnverifiedClaims, AuthError> {
    let malformed = || AuthError::MalformedToken("payload is not base64url JSON".to_string());

    let payload = token.split('.').nth(1).ok_or_else(malformed)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
    serde_json::from_slice(&bytes).map_err(|_| malformed())
}

/// Tenant segment of an issuer such as `https://login.microsoftonline.com/{tid}/v2.0`
/// or `https://sts.windows.net/{tid}/`.
fn tenant_from_issuer(issuer: &str) -> Option<String> {
    let url = url::Url::parse(issuer).ok()?;
    url.path_segments()?
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Tenant identifiers are interpolated into the key discovery URL, so only
/// GUID/domain characters are accepted.
fn is_valid_tenant(tenant: &str) -> bool {
    !tenant.is_empty()
        && tenant.len() <= 256
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode_payload(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.sig")
    }

    fn verifier() -> TokenVerifier {
        let identity = IdentityConfig {
            client_id: "api-client".to_string(),
            tenant_id: "home-tenant".to_string(),
            authority_host: "http://127.0.0.1:1".to_string(),
            ..IdentityConfig::default()
        };
        TokenVerifier::new(reqwest::Client::new(), &identity)
    }

    #[test]
    fn extract_unverified_claims_rejects_malformed_token() {
        assert!(extract_unverified_claims("not-a-jwt").is_err());
        assert!(extract_unverified_claims("a.!!!.c").is_err());
    }

    #[test]
    fn tenant_prefers_tid_claim() {
        let claims = extract_unverified_claims(&encode_payload(&json!({
            "tid": "token-tenant",
            "iss": "https://login.microsoftonline.com/issuer-tenant/v2.0"
        })))
        .unwrap();

        assert_eq!(verifier().tenant_for(&claims).unwrap(), "token-tenant");
    }

    #[test]
    fn tenant_falls_back_to_issuer_then_home() {
        let from_iss = UnverifiedClaims {
            tid: None,
            iss: Some("https://sts.windows.net/issuer-tenant/".to_string()),
        };
        assert_eq!(verifier().tenant_for(&from_iss).unwrap(), "issuer-tenant");

        let bare = UnverifiedClaims::default();
        assert_eq!(verifier().tenant_for(&bare).unwrap(), "home-tenant");
    }

    #[test]
    fn tenant_with_path_characters_is_rejected() {
        let claims = UnverifiedClaims {
            tid: Some("../../evil".to_string()),
            iss: None,
        };
        assert!(matches!(
            verifier().tenant_for(&claims),
            Err(AuthError::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_not_an_error() {
        let verification = verifier().validate("definitely not a token").await;

        assert!(!verification.is_valid);
        assert!(verification.claims.is_none());
    }

    #[tokio::test]
    async fn foreign_algorithm_is_rejected_before_key_lookup() {
        // GIVEN: a token that advertises HS256
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","kid":"k1","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"sub":"x","aud":"api-client","exp":9999999999}"#);
        let token = format!("{header}.{body}.c2ln");

        // WHEN: verified by an RS256 verifier
        let err = verifier().verify(&token).await.unwrap_err();

        // THEN: rejected as invalid without touching the (unreachable) key endpoint
        assert!(matches!(err, AuthError::TokenInvalid(_)));
    }

    #[test]
    fn identity_requires_subject() {
        let mut claims = Map::new();
        claims.insert("exp".to_string(), json!(1));
        assert!(VerifiedIdentity::from_claims("t".to_string(), claims).is_err());
    }

    #[test]
    fn identity_reads_scopes_and_principal_key() {
        let claims = json!({
            "sub": "sub-1",
            "oid": "oid-1",
            "exp": 1_900_000_000_u64,
            "scp": "mcp User.Read",
            "preferred_username": "alice@contoso.com"
        });
        let Value::Object(claims) = claims else { unreachable!() };

        let identity = VerifiedIdentity::from_claims("t1".to_string(), claims).unwrap();

        assert_eq!(identity.scopes, vec!["mcp", "User.Read"]);
        assert_eq!(identity.username.as_deref(), Some("alice@contoso.com"));
        assert_eq!(identity.principal_key(), "t1:oid-1");
    }
}
