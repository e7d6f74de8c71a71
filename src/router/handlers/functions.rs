//! Function CRUD and invocation handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::super::AppState;
use super::ApiError;
use crate::database::{Function, FunctionUpdate, Language, NewFunction};
use crate::executor::Backend;

/// Smallest memory limit a function may request, in MB
const MIN_MEMORY_MB: u32 = 64;

#[derive(Debug, Deserialize)]
pub struct CreateFunctionRequest {
    pub name: String,
    pub route: String,
    pub language: String,
    pub code: String,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
}

fn default_timeout() -> u32 {
    30
}

fn default_memory() -> u32 {
    128
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateFunctionRequest {
    pub name: Option<String>,
    pub route: Option<String>,
    pub language: Option<String>,
    pub code: Option<String>,
    pub timeout: Option<u32>,
    pub memory: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct InvokeQuery {
    pub backend: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub result: Value,
    pub execution_id: i64,
    pub duration_ms: f64,
}

fn parse_language(tag: &str) -> Result<Language, ApiError> {
    Language::parse(tag)
        .ok_or_else(|| ApiError::bad_request(format!("Unsupported language: {}", tag)))
}

fn validate_limits(timeout: u32, memory: u32) -> Result<(), ApiError> {
    if timeout < 1 {
        return Err(ApiError::bad_request("timeout must be at least 1 second"));
    }
    if memory < MIN_MEMORY_MB {
        return Err(ApiError::bad_request(format!(
            "memory must be at least {} MB",
            MIN_MEMORY_MB
        )));
    }
    Ok(())
}

fn validate_route(route: &str) -> Result<(), ApiError> {
    if !route.starts_with('/') {
        return Err(ApiError::bad_request("route must start with /"));
    }
    if route.starts_with("/api") {
        return Err(ApiError::bad_request("route may not shadow the /api prefix"));
    }
    Ok(())
}

/// Register a function and eagerly prepare its image in every backend.
///
/// Unsupported languages and duplicate names/routes are rejected before
/// anything is persisted or built.
pub async fn create_function(
    State(state): State<AppState>,
    Json(request): Json<CreateFunctionRequest>,
) -> Result<Json<Function>, ApiError> {
    let language = parse_language(&request.language)?;
    validate_limits(request.timeout, request.memory)?;
    validate_route(&request.route)?;

    let function = state.db.function_store().await.insert(&NewFunction {
        name: request.name,
        route: request.route,
        language,
        code: request.code,
        timeout: request.timeout,
        memory: request.memory,
    })?;

    state.coordinator.prepare_all(&function).await?;

    Ok(Json(function))
}

/// List registered functions
pub async fn list_functions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Function>>, ApiError> {
    let functions = state
        .db
        .function_store()
        .await
        .list(query.skip, query.limit)?;
    Ok(Json(functions))
}

/// Get one function
pub async fn get_function(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
) -> Result<Json<Function>, ApiError> {
    let function = state
        .db
        .function_store()
        .await
        .get(function_id)?
        .ok_or_else(|| ApiError::not_found("Function not found"))?;
    Ok(Json(function))
}

/// Update a function and re-prepare its images in every backend
pub async fn update_function(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
    Json(request): Json<UpdateFunctionRequest>,
) -> Result<Json<Function>, ApiError> {
    let language = match request.language.as_deref() {
        Some(tag) => Some(parse_language(tag)?),
        None => None,
    };
    if let Some(route) = request.route.as_deref() {
        validate_route(route)?;
    }
    validate_limits(request.timeout.unwrap_or(1), request.memory.unwrap_or(MIN_MEMORY_MB))?;

    let update = FunctionUpdate {
        name: request.name,
        route: request.route,
        language,
        code: request.code,
        timeout: request.timeout,
        memory: request.memory,
    };

    let function = {
        let store = state.db.function_store().await;
        if store.get(function_id)?.is_none() {
            return Err(ApiError::not_found("Function not found"));
        }
        store.update(function_id, &update)?
    };

    state.coordinator.prepare_all(&function).await?;

    Ok(Json(function))
}

/// Delete a function, removing its images and pooled containers everywhere
pub async fn delete_function(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
) -> Result<Json<Function>, ApiError> {
    let function = state
        .db
        .function_store()
        .await
        .get(function_id)?
        .ok_or_else(|| ApiError::not_found("Function not found"))?;

    state.coordinator.remove_all(&function).await;

    state.db.function_store().await.delete(function_id)?;

    Ok(Json(function))
}

/// Invoke a function on the selected backend (default `standard`)
pub async fn invoke_function(
    State(state): State<AppState>,
    Path(function_id): Path<i64>,
    Query(query): Query<InvokeQuery>,
    body: Option<Json<InvokeRequest>>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let backend = match query.backend.as_deref() {
        Some(tag) => Backend::parse(tag)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown backend: {}", tag)))?,
        None => Backend::Standard,
    };

    let function = state
        .db
        .function_store()
        .await
        .get(function_id)?
        .ok_or_else(|| ApiError::not_found("Function not found"))?;

    let event = body.map(|b| b.0.parameters).unwrap_or_else(empty_object);

    let outcome = state.coordinator.invoke(&function, backend, event).await?;

    Ok(Json(InvokeResponse {
        result: outcome.result,
        execution_id: outcome.execution_id,
        duration_ms: outcome.duration_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::InvocationCoordinator;
    use crate::database::Database;
    use crate::executor::ExecutorRegistry;
    use crate::metrics::{MetricStore, MetricsCollector};
    use axum::http::StatusCode;
    use std::sync::Arc;

    /// State over in-memory stores and an empty registry: prepare fan-out
    /// becomes a no-op, validation and persistence behave as in production.
    fn test_state() -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(MetricStore::open_in_memory().unwrap());
        let collector = Arc::new(MetricsCollector::new(store));
        let registry = Arc::new(ExecutorRegistry::new());
        let coordinator = Arc::new(InvocationCoordinator::new(
            db.clone(),
            registry,
            collector.clone(),
        ));

        AppState {
            db,
            coordinator,
            collector,
            config: Arc::new(crate::config::Configuration::default()),
        }
    }

    fn request(name: &str, route: &str, language: &str) -> CreateFunctionRequest {
        CreateFunctionRequest {
            name: name.into(),
            route: route.into(),
            language: language.into(),
            code: "def handler(e): return e".into(),
            timeout: 10,
            memory: 128,
        }
    }

    #[tokio::test]
    async fn test_create_function() {
        let state = test_state();

        let Json(function) = create_function(State(state), Json(request("hello", "/hello", "python")))
            .await
            .unwrap();

        assert_eq!(function.name, "hello");
        assert_eq!(function.language, Language::Python);
    }

    #[tokio::test]
    async fn test_unsupported_language_persists_nothing() {
        let state = test_state();

        let err = create_function(State(state.clone()), Json(request("r", "/r", "ruby")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("ruby"));

        // Rejected before any row was written
        let functions = state.db.function_store().await.list(0, 10).unwrap();
        assert!(functions.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_route_rejected() {
        let state = test_state();

        create_function(State(state.clone()), Json(request("a", "/x", "python")))
            .await
            .unwrap();

        let err = create_function(State(state.clone()), Json(request("b", "/x", "python")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let functions = state.db.function_store().await.list(0, 10).unwrap();
        assert_eq!(functions.len(), 1);
    }

    #[tokio::test]
    async fn test_limits_validated() {
        let state = test_state();

        let mut too_small = request("tiny", "/tiny", "python");
        too_small.memory = 32;
        let err = create_function(State(state.clone()), Json(too_small))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let mut zero_timeout = request("fast", "/fast", "javascript");
        zero_timeout.timeout = 0;
        let err = create_function(State(state), Json(zero_timeout))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invoke_missing_function_is_404() {
        let state = test_state();

        let err = invoke_function(
            State(state),
            Path(42),
            Query(InvokeQuery { backend: None }),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invoke_unknown_backend_is_400() {
        let state = test_state();

        create_function(State(state.clone()), Json(request("f", "/f", "python")))
            .await
            .unwrap();

        let err = invoke_function(
            State(state),
            Path(1),
            Query(InvokeQuery {
                backend: Some("firecracker".into()),
            }),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("firecracker"));
    }
}
