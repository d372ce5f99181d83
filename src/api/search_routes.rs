//! `/api/search`: keyword / vector / hybrid retrieval over the KB.

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;

use crate::api::{ApiError, ApiResult, AppState};
use crate::error::PrismError;
use crate::kb::retrieval::{SearchMode, SearchResult};

#[derive(Debug, Deserialize)]
pub struct SearchInput {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub repo_filter: Option<String>,
    #[serde(default)]
    pub search_type: SearchMode,
}

fn default_limit() -> usize {
    10
}

pub async fn search_kb(
    State(state): State<AppState>,
    Json(input): Json<SearchInput>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let retriever = state.retriever.as_ref().ok_or_else(|| {
        ApiError(PrismError::Configuration(
            "RAG retrieval is not available (no database configured)".to_string(),
        ))
    })?;
    let results = retriever
        .search(
            input.search_type,
            &input.query,
            input.limit,
            input.repo_filter.as_deref(),
        )
        .await?;
    Ok(Json(results))
}
