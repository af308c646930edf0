//! Gateway Server
//!
//! HTTP server exposing the Nightscout operations over the Streamable HTTP
//! MCP transport, plus the OAuth discovery documents clients need to obtain
//! a token.

mod errors;
mod handlers;
pub mod logging_middleware;
mod mcp_middleware;
mod state;

pub use errors::GatewayError;
pub use handlers::{HealthResponse, OAuthServerMetadata, ProtectedResourceMetadata};
pub use mcp_middleware::SESSION_HEADER;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::{middleware, routing::get, Router};
use nightscout_core::ConfigError;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::TokenVerifier;
use crate::mcp::NightscoutHandler;
use crate::session::{RegistrySessionManager, SessionRegistry};
use crate::tools::OperationRegistry;

/// Keep-alive comment interval on open SSE streams
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Reconnect delay advertised to clients in the priming event
const SSE_RETRY: Duration = Duration::from_secs(3);

/// Gateway server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS for browser clients
    pub enable_cors: bool,
    /// Externally reachable base URL; derived from the port when unset
    pub public_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            public_url: None,
        }
    }
}

impl GatewayConfig {
    /// Read `HOST`, `PORT`, `ENABLE_CORS` and `MCP_PUBLIC_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                reason: format!("{:?} is not a port number", raw),
            })?,
            None => defaults.port,
        };

        let enable_cors = match get("ENABLE_CORS").map(|v| v.to_ascii_lowercase()) {
            None => defaults.enable_cors,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    name: "ENABLE_CORS",
                    reason: format!("{:?} is not a boolean", v),
                })
            }
        };

        let public_url = match get("MCP_PUBLIC_URL") {
            Some(raw) => {
                url::Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    name: "MCP_PUBLIC_URL",
                    reason: e.to_string(),
                })?;
                Some(raw.trim_end_matches('/').to_string())
            }
            None => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            enable_cors,
            public_url,
        })
    }

    /// Get the socket address
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid {
                name: "HOST",
                reason: format!("{}:{} is not a socket address: {}", self.host, self.port, e),
            })
    }

    /// Base URL advertised in discovery documents and bearer challenges
    pub fn base_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }
}

/// Nightscout MCP gateway
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
    /// Stops rmcp's session workers on shutdown
    cancel: CancellationToken,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<TokenVerifier>,
        operations: Arc<OperationRegistry>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let sessions = Arc::new(RegistrySessionManager::new(
            registry.clone(),
            operations.clone(),
        ));
        let state = AppState {
            registry,
            sessions,
            verifier,
            operations,
            public_url: config.base_url(),
        };
        Self {
            config,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Get the session registry
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry.clone()
    }

    /// rmcp Streamable HTTP service behind the session middleware
    fn mcp_router(&self) -> Router {
        let handler = NightscoutHandler::new(self.state.operations.clone());
        let mcp_service = StreamableHttpService::new(
            move || Ok(handler.clone()),
            self.state.sessions.clone(),
            StreamableHttpServerConfig {
                sse_keep_alive: Some(SSE_KEEP_ALIVE),
                sse_retry: Some(SSE_RETRY),
                stateful_mode: true,
                cancellation_token: self.cancel.child_token(),
            },
        );

        Router::new()
            .nest_service("/mcp", mcp_service)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                mcp_middleware::mcp_session_middleware,
            ))
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/.well-known/oauth-authorization-server",
                get(handlers::oauth_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(handlers::resource_metadata),
            )
            // RFC 9728: Resource-specific metadata endpoint
            .route(
                "/.well-known/oauth-protected-resource/mcp",
                get(handlers::resource_metadata),
            )
            .with_state(self.state.clone())
            .merge(self.mcp_router())
            .layer(CatchPanicLayer::custom(errors::panic_response))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(
                logging_middleware::http_logging_middleware,
            ));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_HEADER)]);
            router = router.layer(cors);
        }

        router
    }

    /// Serve on `listener` until `shutdown` resolves, then close every session
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let local = listener.local_addr()?;
        info!("[Gateway] Listening on {}", local);
        info!("[Gateway] Public URL: {}", self.state.public_url);
        info!(
            "[Gateway] CORS: {}",
            if self.config.enable_cors {
                "enabled"
            } else {
                "disabled"
            }
        );

        let sessions = self.state.sessions.clone();
        let cancel = self.cancel.clone();
        let app = self.router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = sessions.shutdown().await;
                cancel.cancel();
                info!("[Gateway] Shutting down, closed {} session(s)", closed);
            })
            .await?;

        info!("[Gateway] Stopped");
        Ok(())
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.addr()?;
        let listener = TcpListener::bind(addr).await?;

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("[Gateway] Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the gateway in a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
