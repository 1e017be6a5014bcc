//! `NodescopeServer` — axum HTTP server tying the bridge and the operator
//! surface together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument};

use crate::api;
use crate::bridge::bridge_handler;
use crate::config::ServerConfig;
use crate::facade::OperatorFacade;
use crate::health::{self, HealthResponse};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session and node directory.
    pub registry: Arc<SessionRegistry>,
    /// The inward API UI handlers call.
    pub facade: Arc<OperatorFacade>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: ServerConfig,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
}

/// The diagnostics server.
pub struct NodescopeServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    facade: Arc<OperatorFacade>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
}

impl NodescopeServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics_handle: PrometheusHandle) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            config.request_queue_capacity,
            config.max_live_sessions,
        ));
        let facade = Arc::new(OperatorFacade::new(registry.clone(), config.clone()));
        Self {
            config,
            registry,
            facade,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
        }
    }

    /// Build the axum router.
    ///
    /// Body limits and timeouts apply to the operator surface only; the
    /// bridge body is unbounded and lives for the connection's lifetime.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            facade: self.facade.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        let operator_routes = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/sessions", post(api::create_session_handler))
            .route("/api/sessions/{pin}", delete(api::remove_session_handler))
            .route("/api/sessions/{pin}/nodes", get(api::list_nodes_handler))
            .route(
                "/api/sessions/{pin}/nodes/{node_id}/rpc",
                post(api::issue_rpc_handler),
            )
            .layer(TimeoutLayer::new(Duration::from_secs(30)))
            .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB

        let bridge_routes = Router::new().route("/support/{pin}", post(bridge_handler));

        Router::new()
            .merge(operator_routes)
            .merge(bridge_routes)
            .with_state(state)
            .layer(CatchPanicLayer::new())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(&self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
                info!("server shutdown initiated");
            })
            .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get the operator facade.
    pub fn facade(&self) -> &Arc<OperatorFacade> {
        &self.facade
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.registry.session_count(),
        state.registry.connected_node_count(),
    );
    Json(resp)
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
