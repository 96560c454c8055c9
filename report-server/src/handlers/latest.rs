//! Latest decisions handler

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use flowguard_core::logic::decision::{recent_decisions, ReportRow};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct LatestQuery {
    #[validate(range(min = 1))]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub flows: Vec<ReportRow>,
}

/// Most recent decisions, oldest first
pub async fn latest(
    State(state): State<AppState>,
    query: Result<Query<LatestQuery>, QueryRejection>,
) -> AppResult<Json<LatestResponse>> {
    let Query(query) = query?;
    query
        .validate()
        .map_err(|e| AppError::ValidationError(format!("invalid limit: {}", e)))?;

    let limit = query.limit.unwrap_or(state.config.default_limit);
    if limit > state.config.max_limit {
        return Err(AppError::ValidationError(format!(
            "limit must be between 1 and {}",
            state.config.max_limit
        )));
    }

    let path = state.config.decision_log.clone();
    let flows = tokio::task::spawn_blocking(move || recent_decisions(&path, limit))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))??;

    tracing::debug!("Serving {} decision(s)", flows.len());
    Ok(Json(LatestResponse { flows }))
}
