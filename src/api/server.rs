//! API server: HTTP routes, WebSocket upgrade, middleware, shutdown.

use super::auth::TokenValidator;
use super::gateway::ConnectionGateway;
use super::websocket::websocket_handler;
use crate::bus::{BroadcastBus, RoundSnapshot};
use crate::config::ServerConfig;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<ConnectionGateway>,
    pub bus: Arc<BroadcastBus>,
    pub validator: Arc<dyn TokenValidator>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        connections: state.bus.connection_count(),
    })
}

/// GET /rounds/current — same snapshot late joiners receive on the socket.
async fn current_round_handler(
    State(state): State<Arc<AppState>>,
) -> Json<Option<RoundSnapshot>> {
    Json(state.bus.snapshot().await)
}

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until ctrl-c/SIGTERM.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("api server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("api server stopped gracefully");
        Ok(())
    }

    fn create_app(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/rounds/current", get(current_round_handler))
            .route("/ws", get(websocket_handler))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .layer(create_cors_layer(&self.config.allowed_origins))
            .with_state(self.state.clone())
    }
}

fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origins
                    .iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET])
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
