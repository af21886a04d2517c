pub mod seen;
pub mod status;

use axum::Router;
use axum::routing::get;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::monitor::StatusHandle;

#[derive(Clone)]
pub struct AppState {
    pub status: StatusHandle,
    pub pool: SqlitePool,
}

/// Read-only status API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(status::healthz))
        .route("/status", get(status::get))
        .route("/seen", get(seen::list))
        .route("/seen/{source}/{external_id}", get(seen::get))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
