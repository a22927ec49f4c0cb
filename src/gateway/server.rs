//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::AuthGate;
use super::mcp::McpHandler;
use super::router::{AppState, create_router};
use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::downstream::Connector;
use crate::oauth::{ProtectedResourceMetadata, TokenCache, TokenEndpoint};
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// OBO gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Fully wired router
    app: Router,
}

impl Gateway {
    /// Validate `config` and wire every component
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is incomplete, or an
    /// HTTP error if the outbound client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let app = build_app(&config)?;
        Ok(Self { config, app })
    }

    /// Run the gateway until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MCP OBO GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(issuer = %self.config.oauth.issuer(), "OAuth issuer");
        info!(tenant = %self.config.identity.tenant_id, "Home tenant");
        info!(downstream = %self.config.downstream.base_url, "Downstream API");
        if self.config.token_cache.enabled {
            info!(max_entries = self.config.token_cache.max_entries, "Exchanged-token cache enabled");
        }
        info!("  POST http://{}:{}/mcp", self.config.server.host, self.config.server.port);
        info!("============================================================");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Wire the router for `config` without validating it.
///
/// # Errors
///
/// Returns an HTTP error if the outbound client cannot be built.
pub fn build_app(config: &Config) -> Result<Router> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let verifier = TokenVerifier::new(http.clone(), &config.identity);
    let gate = Arc::new(AuthGate::new(
        verifier,
        &ProtectedResourceMetadata::url(config),
    ));

    let endpoint = Arc::new(TokenEndpoint::new(http.clone(), config.identity.clone()));
    let cache = config
        .token_cache
        .enabled
        .then(|| Arc::new(TokenCache::new(config.token_cache.max_entries)));
    let connector = Arc::new(Connector::new(
        http,
        config.downstream.clone(),
        endpoint,
        cache,
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        gate,
        mcp: McpHandler::new(ToolRegistry::builtin(), Arc::clone(&connector)),
        connector,
    });

    Ok(create_router(state))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
