//! `/api/agents/*`: triage, response drafting, and the combined pipeline
//! (analysis → optional RAG → response).

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::response::{draft_response as heuristic_response, draft_response_llm};
use crate::agents::triage::{analyze_issue as heuristic_analysis, analyze_issue_llm};
use crate::agents::types::{Issue, IssueAnalysisOutput, ResponseOutput};
use crate::api::{ApiResult, AppState};
use crate::kb::retrieval::SearchMode;

#[derive(Debug, Deserialize)]
pub struct IssueInput {
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl From<IssueInput> for Issue {
    fn from(input: IssueInput) -> Self {
        Issue {
            number: input.number,
            title: input.title,
            body: input.body,
            labels: input.labels,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentFlags {
    #[serde(default)]
    pub use_llm: bool,
    #[serde(default = "default_true")]
    pub use_rag: bool,
}

fn default_true() -> bool {
    true
}

async fn analysis_for(state: &AppState, issue: &Issue, use_llm: bool) -> IssueAnalysisOutput {
    if use_llm {
        if let Some(llm) = &state.llm {
            match analyze_issue_llm(llm, issue).await {
                Ok(analysis) => return analysis,
                Err(e) => tracing::warn!(error = %e, "llm triage failed, using heuristic"),
            }
        }
    }
    heuristic_analysis(issue)
}

pub async fn analyze_issue(
    State(state): State<AppState>,
    Query(flags): Query<AgentFlags>,
    Json(input): Json<IssueInput>,
) -> ApiResult<Json<IssueAnalysisOutput>> {
    let issue: Issue = input.into();
    Ok(Json(analysis_for(&state, &issue, flags.use_llm).await))
}

pub async fn draft_response(
    State(state): State<AppState>,
    Query(flags): Query<AgentFlags>,
    Json(input): Json<IssueInput>,
) -> ApiResult<Json<ResponseOutput>> {
    let issue: Issue = input.into();
    let analysis = analysis_for(&state, &issue, flags.use_llm).await;

    let response = match (&state.llm, flags.use_llm) {
        (Some(llm), true) => {
            let references = if flags.use_rag {
                rag_references(&state, &issue, &analysis).await
            } else {
                vec![]
            };
            match draft_response_llm(llm, &issue, &analysis, &references).await {
                Ok(out) => out,
                Err(e) => {
                    tracing::warn!(error = %e, "llm response failed, using heuristic");
                    heuristic_response(&issue, &analysis)
                }
            }
        }
        _ => heuristic_response(&issue, &analysis),
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct AgentRunInput {
    pub issue: IssueInput,
    #[serde(default)]
    pub use_llm: bool,
    #[serde(default = "default_true")]
    pub use_rag: bool,
}

/// Full pipeline: analysis → optional RAG lookup → response, with the RAG
/// hits included in the payload.
pub async fn run_pipeline(
    State(state): State<AppState>,
    Json(input): Json<AgentRunInput>,
) -> ApiResult<Json<Value>> {
    let issue: Issue = input.issue.into();
    let analysis = analysis_for(&state, &issue, input.use_llm).await;

    let mut results = json!({ "analysis": analysis });

    let mut references: Vec<String> = vec![];
    if input.use_rag {
        if let Some(retriever) = &state.retriever {
            let query = std::iter::once(issue.title.clone())
                .chain(analysis.keywords.iter().take(3).cloned())
                .collect::<Vec<_>>()
                .join(" ");
            if let Ok(docs) = retriever.search(SearchMode::Hybrid, &query, 5, None).await {
                references = docs
                    .iter()
                    .map(|d| {
                        format!(
                            "[{} #{}] {}: {}",
                            d.item_type.to_uppercase(),
                            d.item_number,
                            d.section,
                            d.text.chars().take(200).collect::<String>()
                        )
                    })
                    .collect();
                results["rag_results"] = serde_json::to_value(&docs).unwrap_or_default();
            }
        }
    }

    let response = match (&state.llm, input.use_llm) {
        (Some(llm), true) => draft_response_llm(llm, &issue, &analysis, &references)
            .await
            .unwrap_or_else(|_| heuristic_response(&issue, &analysis)),
        _ => heuristic_response(&issue, &analysis),
    };
    results["response"] = serde_json::to_value(&response).unwrap_or_default();
    Ok(Json(results))
}

async fn rag_references(state: &AppState, issue: &Issue, analysis: &IssueAnalysisOutput) -> Vec<String> {
    let Some(retriever) = &state.retriever else {
        return vec![];
    };
    let query = std::iter::once(issue.title.clone())
        .chain(analysis.keywords.iter().take(3).cloned())
        .collect::<Vec<_>>()
        .join(" ");
    match retriever.search(SearchMode::Hybrid, &query, 5, None).await {
        Ok(docs) => docs
            .iter()
            .map(|d| {
                format!(
                    "[{} #{}] {}: {}",
                    d.item_type.to_uppercase(),
                    d.item_number,
                    d.section,
                    d.text.chars().take(200).collect::<String>()
                )
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "rag lookup failed");
            vec![]
        }
    }
}
