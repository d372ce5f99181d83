//! REST + SSE surface over retrieval, agents, and the court.

pub mod agent_routes;
pub mod court_routes;
pub mod search_routes;
pub mod state;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::PrismError;

pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(state::health))
        .route("/api/search", post(search_routes::search_kb))
        .route("/api/agents/analyze", post(agent_routes::analyze_issue))
        .route("/api/agents/response", post(agent_routes::draft_response))
        .route("/api/agents/run", post(agent_routes::run_pipeline))
        .route("/api/court/cases", post(court_routes::create_case))
        .route("/api/court/run", post(court_routes::run_court))
        .route("/api/court/run/stream", post(court_routes::run_court_stream))
        .route(
            "/api/court/prompt-updates/:id/review",
            post(court_routes::review_prompt_update),
        )
        .route(
            "/api/court/prompt-updates/:id/apply",
            post(court_routes::apply_prompt_update),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// HTTP mapping for the error taxonomy. Internal details (URLs, statuses,
/// rule names) stay in logs and events; the response body carries the
/// human-readable message.
pub struct ApiError(pub PrismError);

impl From<PrismError> for ApiError {
    fn from(error: PrismError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PrismError::NotFound(_) => StatusCode::NOT_FOUND,
            PrismError::InvalidState(_) => StatusCode::CONFLICT,
            PrismError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PrismError::UnredactedData { .. } => StatusCode::BAD_REQUEST,
            PrismError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            PrismError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match &self.0 {
            PrismError::UnredactedData { rule_name, json_path } => json!({
                "error": "unredacted data refused",
                "rule": rule_name,
                "path": json_path,
            }),
            other => json!({"error": other.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
