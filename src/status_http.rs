use crate::config::ConsoleConfig;
use crate::controller::ConsoleView;
use anyhow::Result;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

#[derive(Clone)]
struct StatusState {
    view: watch::Receiver<ConsoleView>,
    config: watch::Receiver<ConsoleConfig>,
}

async fn get_status(State(state): State<StatusState>) -> impl IntoResponse {
    let view = state.view.borrow().clone();
    (StatusCode::OK, Json(view))
}

async fn get_config(State(state): State<StatusState>) -> impl IntoResponse {
    let config = state.config.borrow().clone();
    (StatusCode::OK, Json(config))
}

/// Both endpoints read the latest value published on their channel, so
/// live config reloads show up without restarting the server.
pub fn router(
    view: watch::Receiver<ConsoleView>,
    config: watch::Receiver<ConsoleConfig>,
) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/config", get(get_config))
        .layer(CorsLayer::permissive())
        .with_state(StatusState { view, config })
}

pub async fn run_http_server(
    ip: String,
    port: u16,
    view: watch::Receiver<ConsoleView>,
    config: watch::Receiver<ConsoleConfig>,
) -> Result<()> {
    let app = router(view, config);

    let addr = format!("{}:{}", ip, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Status endpoint listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
