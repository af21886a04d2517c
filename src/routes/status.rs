use axum::Json;
use axum::extract::State;

use crate::error::AppError;
use crate::monitor::MonitorStatus;
use crate::routes::AppState;

pub async fn healthz(State(state): State<AppState>) -> Result<&'static str, AppError> {
    if state.status.snapshot().await.running {
        Ok("ok")
    } else {
        Err(AppError::Unavailable("monitor is stopped".to_string()))
    }
}

pub async fn get(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.status.snapshot().await)
}
