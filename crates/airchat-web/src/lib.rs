mod bridge;
mod profile;
mod session;
pub mod state;

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use airchat_server::config::GatewayConfig;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.config.static_dir).append_index_html_on_directories(true);

    Router::new()
        // Observability
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        // Sessions
        .route("/api/session", post(session::create_session))
        .route("/api/logout", post(session::logout))
        // Profiles
        .route("/api/profile", post(profile::update_profile))
        .route("/api/profile/{nick}", get(profile::get_profile))
        // Event relay
        .route("/api/ws", get(bridge::ws_handler))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /metrics`: renders Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// `GET /health`: simple liveness check.
async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// Serve the gateway until ctrl-c, then log out every session.
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    if config.login_secret.is_none() {
        warn!("AIRCHAT_LOGIN_SECRET is unset; no sessions can be opened");
    }
    let addr = config.web_addr.clone();
    let state = AppState::new(config).with_prometheus(prometheus_handle);
    let registry = state.registry.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    registry.shutdown_all().await;
    Ok(())
}
