//! Signing-key resolution against per-tenant JWKS endpoints.
//!
//! Key sets are cached per tenant for `identity.jwks_cache_ttl`. A `kid`
//! that is missing from a cached set forces one refetch before the lookup
//! fails, so key rotation at the identity provider is picked up without
//! waiting for the TTL. Forced refetches are limited to one per tenant per
//! [`MIN_FORCED_REFRESH_INTERVAL`].

use std::time::{Duration, Instant};

use dashmap::{DashMap, mapref::entry::Entry};
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet},
};
use tracing::debug;

use super::AuthError;
use crate::config::IdentityConfig;

/// Minimum gap between two forced refetches for the same tenant.
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// JWKS cache, one entry per tenant.
struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    /// Last forced refetch per tenant
    forced_at: DashMap<String, Instant>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            forced_at: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Claim the forced refetch slot for `tenant`.
    ///
    /// Returns `false` when another forced refetch ran within
    /// `min_interval`.
    fn claim_forced_refresh(&self, tenant: &str, min_interval: Duration) -> bool {
        let now = Instant::now();
        match self.forced_at.entry(tenant.to_string()) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < min_interval {
                    return false;
                }
                last.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Return the cached JWKS for `tenant`, or fetch from `jwks_uri` if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    async fn get_or_fetch(
        &self,
        tenant: &str,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, AuthError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(tenant) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(tenant = %tenant, "Fetching JWKS from {jwks_uri}");
        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeyFetchFailed(format!(
                "{jwks_uri} answered HTTP {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::KeyFetchFailed(format!("invalid key set: {e}")))?;

        self.inner.insert(
            tenant.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );

        Ok(jwks)
    }
}

/// Resolves `(tenant, kid)` to public verification key material.
pub struct SigningKeyResolver {
    identity: IdentityConfig,
    cache: JwksCache,
}

impl SigningKeyResolver {
    /// Create a resolver that fetches key sets with `http`.
    #[must_use]
    pub fn new(http: reqwest::Client, identity: &IdentityConfig) -> Self {
        Self {
            identity: identity.clone(),
            cache: JwksCache::new(http, identity.jwks_cache_ttl),
        }
    }

    /// Find the key `kid` published by `tenant`.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeyFetchFailed`] when the key set cannot be fetched or
    /// parsed, [`AuthError::KeyNotFound`] when no usable key carries `kid`.
    pub async fn resolve(&self, tenant: &str, kid: &str) -> Result<DecodingKey, AuthError> {
        let jwks_uri = self.identity.jwks_uri(tenant);

        let jwks = self.cache.get_or_fetch(tenant, &jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        let not_found = || AuthError::KeyNotFound {
            tenant: tenant.to_string(),
            kid: kid.to_string(),
        };

        if !self
            .cache
            .claim_forced_refresh(tenant, MIN_FORCED_REFRESH_INTERVAL)
        {
            debug!(tenant = %tenant, kid = %kid, "Key not found, forced refresh throttled");
            return Err(not_found());
        }

        // Unknown kid: refresh once and retry
        debug!(tenant = %tenant, kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.cache.get_or_fetch(tenant, &jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(not_found)
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => {
                DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()
            }
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            // Symmetric and OKP keys are never published for token signing here
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}
