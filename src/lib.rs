//! MCP OBO Gateway Library
//!
//! A Model Context Protocol tool server that sits between an MCP client and a
//! delegated downstream API (Microsoft Graph by default).
//!
//! # Features
//!
//! - **Bearer gate**: every `/mcp` request carries a signed access token that
//!   is verified against the identity platform's published signing keys
//! - **On-behalf-of exchange**: tools trade the caller's token for a
//!   downstream token issued to the same user
//! - **OAuth discovery**: authorization-server and protected-resource
//!   metadata, plus a registration endpoint that grows the app's redirect URIs
//! - **Stateless HTTP**: one JSON-RPC message per `POST /mcp`, no sessions
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05, 2025-03-26 and 2025-06-18.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod downstream;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod protocol;
pub mod secret;
pub mod tools;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` wins over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
