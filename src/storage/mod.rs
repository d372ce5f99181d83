//! Storage ports and adapters.
//!
//! `CourtStore` is the single port the court, lesson store, and prompt
//! registry write through. Every implementation runs the redaction guard on
//! every write path; an unredacted value fails the specific write and nothing
//! else. `PgCourtStore` is the production adapter; `MemoryCourtStore` backs
//! orchestrator tests.

pub mod memory;
pub mod migrate;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::court::models::{Case, CaseEvent, CourtRun, CourtRunStatus, Lesson, PromptUpdateProposal};
use crate::embeddings::EmbeddingResult;
use crate::error::PrismResult;

pub use memory::MemoryCourtStore;
pub use postgres::PgCourtStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptUpdateStatus {
    Proposed,
    Approved,
    Rejected,
    Applied,
}

impl PromptUpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptUpdateStatus::Proposed => "proposed",
            PromptUpdateStatus::Approved => "approved",
            PromptUpdateStatus::Rejected => "rejected",
            PromptUpdateStatus::Applied => "applied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "proposed" => PromptUpdateStatus::Proposed,
            "approved" => PromptUpdateStatus::Approved,
            "rejected" => PromptUpdateStatus::Rejected,
            "applied" => PromptUpdateStatus::Applied,
            _ => return None,
        })
    }

    /// The status machine moves monotonically forward:
    /// proposed → approved | rejected, approved → applied.
    pub fn can_transition(self, next: PromptUpdateStatus) -> bool {
        matches!(
            (self, next),
            (PromptUpdateStatus::Proposed, PromptUpdateStatus::Approved)
                | (PromptUpdateStatus::Proposed, PromptUpdateStatus::Rejected)
                | (PromptUpdateStatus::Approved, PromptUpdateStatus::Applied)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonRecord {
    pub id: Uuid,
    pub case_id: Option<Uuid>,
    pub lesson: Lesson,
    pub embedding_model: Option<String>,
    pub embedding_dim: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LessonSearchHit {
    pub record: LessonRecord,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptUpdateRecord {
    pub id: Uuid,
    pub case_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub role: String,
    pub from_version: Option<String>,
    pub proposal: String,
    pub reason: String,
    pub status: PromptUpdateStatus,
    pub review_comment: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
    pub evidence_event_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePrompt {
    pub id: Uuid,
    pub role: String,
    pub version: i32,
    pub prompt: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a case.
#[derive(Debug, Clone, Default)]
pub struct NewCase {
    pub source: Value,
    pub metadata: Value,
    pub result: Value,
    pub feedback: Value,
    pub redaction_policy_version: Option<String>,
}

#[async_trait::async_trait]
pub trait CourtStore: Send + Sync {
    async fn create_case(&self, new_case: NewCase) -> PrismResult<Uuid>;
    async fn get_case(&self, case_id: Uuid) -> PrismResult<Case>;

    /// Events ordered by `(ts, seq)`.
    async fn list_case_events(&self, case_id: Uuid) -> PrismResult<Vec<CaseEvent>>;

    /// Append events; `seq` is assigned here, monotonically per case.
    async fn append_case_events(&self, case_id: Uuid, events: Vec<CaseEvent>) -> PrismResult<()>;

    async fn create_court_run(&self, case_id: Uuid, model: &str) -> PrismResult<Uuid>;
    async fn get_court_run(&self, court_run_id: Uuid) -> PrismResult<CourtRun>;

    /// Finalize a run: `ended_at`, status, and the redacted artifacts blob in
    /// a single commit.
    async fn finish_court_run(
        &self,
        court_run_id: Uuid,
        status: CourtRunStatus,
        artifacts: Value,
    ) -> PrismResult<()>;

    async fn store_judgement(
        &self,
        case_id: Uuid,
        court_run_id: Uuid,
        decision: Value,
    ) -> PrismResult<Uuid>;

    async fn store_lesson(
        &self,
        case_id: Option<Uuid>,
        lesson: &Lesson,
        embedding: Option<&EmbeddingResult>,
    ) -> PrismResult<Uuid>;

    /// Role-scoped ANN search against stored lesson embeddings. Rows whose
    /// `(embedding_model, embedding_dim)` differ from the query embedding
    /// are excluded.
    async fn search_lessons(
        &self,
        role: &str,
        query: &EmbeddingResult,
        k: usize,
    ) -> PrismResult<Vec<LessonSearchHit>>;

    async fn store_prompt_update(
        &self,
        case_id: Option<Uuid>,
        proposal: &PromptUpdateProposal,
    ) -> PrismResult<Uuid>;
    async fn get_prompt_update(&self, id: Uuid) -> PrismResult<PromptUpdateRecord>;

    /// proposed → approved | rejected.
    async fn review_prompt_update(
        &self,
        id: Uuid,
        approve: bool,
        review_comment: Option<String>,
        approved_by: Option<String>,
    ) -> PrismResult<()>;

    /// approved → applied; bumps the active role prompt atomically and
    /// returns the new version.
    async fn apply_prompt_update(&self, id: Uuid) -> PrismResult<i32>;

    async fn active_role_prompt(&self, role: &str) -> PrismResult<Option<RolePrompt>>;
}

/// L2 distance between two vectors; the in-memory ANN fallback.
pub(crate) fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
