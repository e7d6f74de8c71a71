//! Execution history handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::super::AppState;
use super::functions::ListQuery;
use super::ApiError;
use crate::database::Execution;

/// List executions across all functions, most recent first
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let executions = state
        .db
        .execution_store()
        .await
        .list(query.skip, query.limit)?;
    Ok(Json(executions))
}

/// List executions for one function
pub async fn list_for_function(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    if state.db.function_store().await.get(function_id)?.is_none() {
        return Err(ApiError::not_found("Function not found"));
    }

    let executions = state
        .db
        .execution_store()
        .await
        .list_for_function(function_id, query.skip, query.limit)?;
    Ok(Json(executions))
}
