//! Access tokens and the credential abstraction

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;
use crate::secret::SecretString;

/// Seconds before expiry at which a token is treated as expired
const EXPIRY_BUFFER_SECS: u64 = 60;

/// Source of bearer tokens for outbound calls
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Acquire a token valid for `scopes`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Delegation`] when the identity provider
    /// refuses the request.
    async fn get_token(&self, scopes: &[String]) -> Result<AccessToken>;
}

/// An access token for the downstream API
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The bearer value
    pub token: SecretString,
    /// Expiration time (Unix timestamp)
    pub expires_at: Option<u64>,
}

impl AccessToken {
    /// Build from a token endpoint response
    pub fn from_response(access_token: String, expires_in: Option<u64>) -> Self {
        let expires_at = expires_in.map(|secs| now_secs() + secs);
        Self {
            token: SecretString::new(access_token),
            expires_at,
        }
    }

    /// Check if the token is expired (with 60 second buffer)
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now_secs() + EXPIRY_BUFFER_SECS >= expires_at)
    }
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Error body of a token endpoint response (RFC 6749 section 5.2)
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    /// `error: error_description`, or whichever part is present
    pub fn describe(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (Some(code), Some(description)) => Some(format!("{code}: {description}")),
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
