//! Exchanged-token cache
//!
//! Keyed by `(tenant, principal, sorted scope set)`, so a token issued for
//! one caller is never handed to another. Entries are dropped once they enter
//! the 60 second expiry buffer.

use dashmap::DashMap;
use tracing::debug;

use super::token::AccessToken;

/// Cache key: tenant, principal, and the scope set in sorted order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant: String,
    principal: String,
    scopes: Vec<String>,
}

impl CacheKey {
    /// Build a key; scope order does not matter
    #[must_use]
    pub fn new(tenant: &str, principal: &str, scopes: &[String]) -> Self {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            tenant: tenant.to_string(),
            principal: principal.to_string(),
            scopes,
        }
    }
}

/// Bounded in-memory cache of exchanged tokens
pub struct TokenCache {
    entries: DashMap<CacheKey, AccessToken>,
    max_entries: usize,
}

impl TokenCache {
    /// Create a cache holding at most `max_entries` tokens
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// A still-valid token for `key`, if one is cached
    pub fn get(&self, key: &CacheKey) -> Option<AccessToken> {
        let token = self.entries.get(key).map(|entry| entry.value().clone())?;
        if token.is_expired() {
            self.entries.remove(key);
            return None;
        }
        Some(token)
    }

    /// Store `token` under `key`; tokens without an expiry are not cached
    pub fn insert(&self, key: CacheKey, token: AccessToken) {
        if token.expires_at.is_none() || token.is_expired() {
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.entries.retain(|_, cached| !cached.is_expired());
            if self.entries.len() >= self.max_entries {
                debug!(entries = self.entries.len(), "Token cache full, clearing");
                self.entries.clear();
            }
        }

        self.entries.insert(key, token);
    }

    /// Number of cached tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
