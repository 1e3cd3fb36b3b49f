use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use caramel_core::protocol::{HEALTH_PATH, JOINTS_PATH, METRICS_PATH, POSES_PATH, RPC_PATH};
use caramel_core::{CaramelError, Result, SessionStatus, DEFAULT_PORT};
use caramel_settings::HostSettings;

use crate::driver::DriverState;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::stream;

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&HostSettings> for ServerConfig {
    fn from(settings: &HostSettings) -> Self {
        Self {
            bind: settings.bind.clone(),
            port: settings.port,
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<DriverState>,
    pub cancel: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(RPC_PATH, get(rpc_handler))
        .route(JOINTS_PATH, get(joints_handler))
        .route(POSES_PATH, get(poses_handler))
        .route(HEALTH_PATH, get(health_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Bind failures are classified into transport faults.
pub async fn start(config: &ServerConfig, driver: Arc<DriverState>) -> Result<ServerHandle> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CaramelError::from_bind(&e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| CaramelError::from_bind(&e))?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let cancel = coordinator.token();
    let router = build_router(AppState {
        driver,
        cancel: cancel.clone(),
    });

    let handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
        if let Err(e) = served {
            error!(error = %e, "tracking service stopped with an error");
        }
    });
    coordinator.track(handle);

    info!(port = local_addr.port(), bind = %config.bind, "tracking service started");
    Ok(ServerHandle {
        local_addr,
        coordinator,
        shutdown_timeout: config.shutdown_timeout,
    })
}

/// Handle returned by [`start`]. Dropping it leaves the service running until
/// the runtime stops; call [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    coordinator: Arc<ShutdownCoordinator>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub async fn shutdown(self) -> ShutdownReport {
        self.coordinator.shutdown(self.shutdown_timeout).await
    }
}

async fn rpc_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream::serve_rpc(socket, state, peer))
}

async fn joints_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream::serve_joints(socket, state, peer))
}

async fn poses_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream::serve_poses(socket, state, peer))
}

/// GET /health: 200 while the link is healthy, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.driver.health();
    let code = if state.driver.monitor().status() == SessionStatus::Success {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.driver.metrics().to_json())
}
