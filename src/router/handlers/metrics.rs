//! Metric query handlers

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::super::AppState;
use super::ApiError;
use crate::metrics::{AggregatedRow, MetricRecord, TimeRange};

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    /// Unix milliseconds, inclusive
    pub start_time: Option<i64>,
    /// Unix milliseconds, inclusive
    pub end_time: Option<i64>,
}

impl From<&RangeQuery> for TimeRange {
    fn from(query: &RangeQuery) -> Self {
        TimeRange {
            start_ms: query.start_time,
            end_ms: query.end_time,
        }
    }
}

/// Aggregated metrics for one function, one row per backend
pub async fn function_metrics(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<AggregatedRow>>, ApiError> {
    let rows = state
        .collector
        .aggregated(Some(function_id), TimeRange::from(&query))
        .await?;
    Ok(Json(rows))
}

/// Raw metric records for one function
pub async fn raw_metrics(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<MetricRecord>>, ApiError> {
    let records = state
        .collector
        .raw(function_id, TimeRange::from(&query))
        .await?;
    Ok(Json(records))
}

/// Per-backend rollup across all functions
#[derive(Debug, Default, Serialize)]
pub struct BackendRollup {
    pub avg_duration_ms: f64,
    pub avg_memory_used_mb: f64,
    pub total_executions: i64,
    pub errors: i64,
}

/// Compare the isolation backends side by side
pub async fn compare_backends(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, BackendRollup>>, ApiError> {
    let rows = state.collector.aggregated(None, TimeRange::default()).await?;

    let mut grouped: BTreeMap<String, Vec<&AggregatedRow>> = BTreeMap::new();
    for row in &rows {
        grouped.entry(row.backend.clone()).or_default().push(row);
    }

    let comparison = grouped
        .into_iter()
        .map(|(backend, rows)| {
            let n = rows.len() as f64;
            (
                backend,
                BackendRollup {
                    avg_duration_ms: rows.iter().map(|r| r.avg_duration_ms).sum::<f64>() / n,
                    avg_memory_used_mb: rows.iter().map(|r| r.avg_memory_used_mb).sum::<f64>() / n,
                    total_executions: rows.iter().map(|r| r.total_executions).sum(),
                    errors: rows.iter().map(|r| r.errors).sum(),
                },
            )
        })
        .collect();

    Ok(Json(comparison))
}
