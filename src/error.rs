//! Error types for the OBO gateway

use std::io;

use thiserror::Error;

/// Result type alias for the OBO gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors outside the token-verification boundary
///
/// Verification failures live in [`crate::auth::AuthError`] and never leave
/// the request gate.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The identity provider refused the delegated (or service) token request
    #[error("Token acquisition failed: {0}")]
    Delegation(String),

    /// Downstream API answered with a non-success status
    #[error("API call failed to {endpoint}: {status}")]
    Downstream {
        /// HTTP status returned by the downstream API
        status: u16,
        /// Path that was called (relative to the base URL)
        endpoint: String,
    },

    /// Dynamic client registration failed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Malformed JSON-RPC envelope
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Downstream status code, if this error came from a downstream call
    #[must_use]
    pub fn downstream_status(&self) -> Option<u16> {
        match self {
            Self::Downstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::Delegation(_) | Self::Downstream { .. } | Self::Http(_) => {
                rpc_codes::SERVER_ERROR_START
            }
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// No bearer token on a protected endpoint
    pub const AUTH_REQUIRED: i32 = -32001;
    /// Bearer token present but rejected by the verifier
    pub const INVALID_TOKEN: i32 = -32003;
}
