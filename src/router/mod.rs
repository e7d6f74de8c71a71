//! HTTP router module
//!
//! REST API for function management, invocation, execution history and
//! metrics, plus dynamic dispatch of registered function routes.

pub mod handlers;

pub use handlers::ApiError;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Configuration;
use crate::coordinator::InvocationCoordinator;
use crate::database::Database;
use crate::metrics::MetricsCollector;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Function/execution store
    pub db: Arc<Database>,

    /// Invocation coordinator
    pub coordinator: Arc<InvocationCoordinator>,

    /// Metrics collector
    pub collector: Arc<MetricsCollector>,

    /// Global configuration
    pub config: Arc<Configuration>,
}

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Function CRUD
        .route(
            "/functions",
            post(handlers::functions::create_function).get(handlers::functions::list_functions),
        )
        .route(
            "/functions/:function_id",
            get(handlers::functions::get_function)
                .put(handlers::functions::update_function)
                .delete(handlers::functions::delete_function),
        )
        // Invocation
        .route(
            "/functions/:function_id/invoke",
            post(handlers::functions::invoke_function),
        )
        // Execution history
        .route("/executions", get(handlers::executions::list_executions))
        .route(
            "/functions/:function_id/executions",
            get(handlers::executions::list_for_function),
        )
        // Metrics
        .route(
            "/metrics/functions/:function_id",
            get(handlers::metrics::function_metrics),
        )
        .route(
            "/metrics/raw/:function_id",
            get(handlers::metrics::raw_metrics),
        )
        .route("/metrics/compare", get(handlers::metrics::compare_backends));

    Router::new()
        .nest("/api", api_routes)
        // Any other path may be a registered function route
        .fallback(handlers::dynamic::dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
