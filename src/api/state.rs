//! Shared application state for the HTTP server.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::court::orchestrator::CourtOrchestrator;
use crate::court::runner::{AgentRunner, HeuristicAgentRunner, LlmAgentRunner};
use crate::embeddings::{embedder_from_config, Embedder};
use crate::error::PrismResult;
use crate::kb::retrieval::Retriever;
use crate::lessons::LessonService;
use crate::llm::{LlmClient, ModelSelector};
use crate::prompts::PromptRegistry;
use crate::redaction::{load_redaction_policy, RedactionPolicy, Redactor};
use crate::storage::{CourtStore, PgCourtStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub redactor: Arc<Redactor>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn CourtStore>,
    pub lessons: Arc<LessonService>,
    pub prompts: Arc<PromptRegistry>,
    pub orchestrator: Arc<CourtOrchestrator>,
    pub retriever: Option<Arc<Retriever>>,
    pub llm: Option<Arc<LlmClient>>,
}

impl AppState {
    /// Wire the full service graph from configuration. The retriever is only
    /// present when a database is configured; the LLM client only when a
    /// credential is set — both endpoints degrade rather than fail at boot.
    pub async fn from_config(config: AppConfig, pool: PgPool) -> PrismResult<Self> {
        let policy = if config.redaction_policy_path.is_file() {
            load_redaction_policy(&config.redaction_policy_path)?
        } else {
            RedactionPolicy::builtin()
        };
        let redactor = Arc::new(Redactor::new(policy)?);
        let embedder: Arc<dyn Embedder> = Arc::from(embedder_from_config(&config)?);

        let store: Arc<dyn CourtStore> =
            Arc::new(PgCourtStore::new(pool.clone(), redactor.clone()));
        let lessons = Arc::new(LessonService::new(
            store.clone(),
            embedder.clone(),
            redactor.clone(),
        ));
        let prompts = Arc::new(PromptRegistry::new(store.clone()));

        let llm = match &config.openai_api_key {
            Some(key) => Some(Arc::new(LlmClient::new(
                key.clone(),
                ModelSelector::from_env(),
            )?)),
            None => None,
        };
        let runner: Arc<dyn AgentRunner> = match &config.openai_api_key {
            Some(key) => Arc::new(LlmAgentRunner::new(
                LlmClient::new(key.clone(), ModelSelector::from_env())?,
                PromptRegistry::new(store.clone()),
            )),
            None => Arc::new(HeuristicAgentRunner),
        };
        let orchestrator = Arc::new(CourtOrchestrator::new(
            store.clone(),
            runner,
            redactor.clone(),
            lessons.clone(),
        ));
        let retriever = Some(Arc::new(Retriever::new(pool, embedder.clone())));

        Ok(Self {
            config: Arc::new(config),
            redactor,
            embedder,
            store,
            lessons,
            prompts,
            orchestrator,
            retriever,
            llm,
        })
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rag_available": state.retriever.is_some(),
        "llm_available": state.llm.is_some(),
        "github_token_set": state.config.github_token.is_some(),
    }))
}
