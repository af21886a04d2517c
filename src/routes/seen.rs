use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::listing::SourceId;
use crate::models::seen_listing::SeenListing;
use crate::routes::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct SeenQuery {
    pub source: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SeenPage {
    pub total: i64,
    pub listings: Vec<SeenListing>,
}

fn parse_source(raw: &str) -> Result<SourceId, AppError> {
    raw.parse().map_err(AppError::BadRequest)
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<SeenQuery>,
) -> Result<Json<SeenPage>, AppError> {
    let source = query
        .source
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(parse_source)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let listings = SeenListing::recent(&state.pool, source, limit).await?;
    let total = SeenListing::count(&state.pool, source).await?;
    Ok(Json(SeenPage { total, listings }))
}

pub async fn get(
    State(state): State<AppState>,
    Path((source, external_id)): Path<(String, String)>,
) -> Result<Json<SeenListing>, AppError> {
    let source = parse_source(&source)?;
    SeenListing::get(&state.pool, source, &external_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{source}/{external_id} has not been seen")))
}
