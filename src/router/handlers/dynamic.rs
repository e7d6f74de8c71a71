//! Dynamic function route dispatch
//!
//! Router fallback: any unmatched path is looked up against registered
//! function routes and, on a hit, invoked on the standard backend with the
//! request body as the event.

use axum::{
    body::Bytes,
    extract::State,
    http::Uri,
    Json,
};
use serde_json::Value;

use super::super::AppState;
use super::ApiError;
use crate::executor::Backend;

pub async fn dispatch(
    State(state): State<AppState>,
    uri: Uri,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let path = uri.path();

    let function = state
        .db
        .function_store()
        .await
        .get_by_route(path)?
        .ok_or_else(|| ApiError::not_found(format!("No function registered for {}", path)))?;

    // A non-JSON or empty body invokes the handler with an empty event
    let event: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| Value::Object(Default::default()))
    };

    let outcome = state
        .coordinator
        .invoke(&function, Backend::Standard, event)
        .await?;

    Ok(Json(outcome.result))
}
