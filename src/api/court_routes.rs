//! `/api/court/*`: case creation, synchronous and streaming court runs, and
//! the prompt-update review/apply lifecycle.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::api::{ApiError, ApiResult, AppState};
use crate::court::orchestrator::{CourtRunSummary, CourtStreamEvent};
use crate::prompts::ReviewAction;
use crate::storage::NewCase;

#[derive(Debug, Default, Deserialize)]
pub struct CreateCaseInput {
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub feedback: Value,
}

pub async fn create_case(
    State(state): State<AppState>,
    Json(input): Json<CreateCaseInput>,
) -> ApiResult<Json<Value>> {
    let case_id = state
        .store
        .create_case(NewCase {
            source: input.source,
            metadata: input.metadata,
            result: input.result,
            feedback: input.feedback,
            redaction_policy_version: Some(state.redactor.policy_version().to_string()),
        })
        .await?;
    Ok(Json(json!({"case_id": case_id})))
}

#[derive(Debug, Deserialize)]
pub struct CourtRunInput {
    pub case_id: Uuid,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "unspecified".to_string()
}

pub async fn run_court(
    State(state): State<AppState>,
    Json(input): Json<CourtRunInput>,
) -> ApiResult<Json<CourtRunSummary>> {
    let summary = state
        .orchestrator
        .run_case(input.case_id, &input.model)
        .await?;
    Ok(Json(summary))
}

/// The same run, streamed as Server-Sent Events with event types
/// `start | stage_start | stage_complete | complete`.
pub async fn run_court_stream(
    State(state): State<AppState>,
    Json(input): Json<CourtRunInput>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<CourtStreamEvent>();
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .run_case_with_progress(input.case_id, &input.model, cancel_rx, Some(tx))
            .await
        {
            tracing::error!(error = %e, "streamed court run failed");
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.kind()).data(payload))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct ReviewInput {
    pub action: ReviewAction,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
}

pub async fn review_prompt_update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ReviewInput>,
) -> ApiResult<Json<Value>> {
    let record = state
        .prompts
        .review(id, input.action, input.comment, input.reviewed_by)
        .await?;
    Ok(Json(serde_json::to_value(&record).map_err(|e| ApiError(e.into()))?))
}

pub async fn apply_prompt_update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let new_version = state.prompts.apply(id).await?;
    Ok(Json(json!({
        "id": id,
        "status": "applied",
        "new_version": new_version,
    })))
}
