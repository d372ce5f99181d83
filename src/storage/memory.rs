//! In-memory `CourtStore` used by the orchestrator tests and fixture runs.
//!
//! Behaves like the Postgres adapter where it matters: the redaction guard
//! runs on every write, `seq` is monotonic per case, event listing orders by
//! `(ts, seq)`, and prompt apply is atomic with a single winner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::court::models::{
    Case, CaseEvent, CourtRun, CourtRunStatus, Lesson, PromptUpdateProposal,
};
use crate::embeddings::EmbeddingResult;
use crate::error::{PrismError, PrismResult};
use crate::redaction::Redactor;
use crate::storage::{
    l2_distance, CourtStore, LessonRecord, LessonSearchHit, NewCase, PromptUpdateRecord,
    PromptUpdateStatus, RolePrompt,
};

#[derive(Default)]
struct State {
    cases: HashMap<Uuid, Case>,
    events: HashMap<Uuid, Vec<CaseEvent>>,
    court_runs: HashMap<Uuid, CourtRun>,
    judgements: HashMap<Uuid, (Uuid, Uuid, Value)>,
    lessons: HashMap<Uuid, (LessonRecord, Option<Vec<f32>>)>,
    prompt_updates: HashMap<Uuid, PromptUpdateRecord>,
    role_prompts: Vec<RolePrompt>,
}

pub struct MemoryCourtStore {
    redactor: Arc<Redactor>,
    state: Mutex<State>,
}

impl MemoryCourtStore {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self {
            redactor,
            state: Mutex::new(State::default()),
        }
    }

    fn guard(&self, value: &Value) -> PrismResult<()> {
        self.redactor.assert_no_sensitive_data(value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Test helper: every derived persisted value, serialized. Lets tests
    /// grep for raw secrets across case_events, court_runs, judgements,
    /// lessons, and prompt_updates at once (the case row itself is the
    /// evidence under review and is excluded).
    pub fn dump_all_persisted_json(&self) -> Vec<String> {
        let state = self.lock();
        let mut out = Vec::new();
        for events in state.events.values() {
            for event in events {
                out.push(serde_json::to_string(event).unwrap_or_default());
            }
        }
        for run in state.court_runs.values() {
            out.push(serde_json::to_string(run).unwrap_or_default());
        }
        for (_, _, decision) in state.judgements.values() {
            out.push(decision.to_string());
        }
        for (record, _) in state.lessons.values() {
            out.push(serde_json::to_string(record).unwrap_or_default());
        }
        for record in state.prompt_updates.values() {
            out.push(serde_json::to_string(record).unwrap_or_default());
        }
        out
    }

    pub fn judgement_count(&self) -> usize {
        self.lock().judgements.len()
    }

    pub fn prompt_updates_for_case(&self, case_id: Uuid) -> Vec<PromptUpdateRecord> {
        self.lock()
            .prompt_updates
            .values()
            .filter(|record| record.case_id == Some(case_id))
            .cloned()
            .collect()
    }

    pub fn lessons_for_case(&self, case_id: Uuid) -> Vec<LessonRecord> {
        self.lock()
            .lessons
            .values()
            .filter(|(record, _)| record.case_id == Some(case_id))
            .map(|(record, _)| record.clone())
            .collect()
    }

    pub fn role_prompts_for_role(&self, role: &str) -> Vec<RolePrompt> {
        self.lock()
            .role_prompts
            .iter()
            .filter(|prompt| prompt.role == role)
            .cloned()
            .collect()
    }

    /// Test helper: seed an approved proposal or active prompt directly.
    pub fn insert_role_prompt(&self, role: &str, version: i32, prompt: &str, is_active: bool) {
        self.lock().role_prompts.push(RolePrompt {
            id: Uuid::new_v4(),
            role: role.to_string(),
            version,
            prompt: prompt.to_string(),
            is_active,
            created_at: Utc::now(),
        });
    }
}

#[async_trait::async_trait]
impl CourtStore for MemoryCourtStore {
    async fn create_case(&self, new_case: NewCase) -> PrismResult<Uuid> {
        // Intake is the one unguarded write: the case row is the evidence
        // under review and may legitimately contain the offending string.
        // Everything derived from it is redacted before persistence.
        let case_id = Uuid::new_v4();
        let case = Case {
            id: case_id,
            source: new_case.source,
            metadata: new_case.metadata,
            result: new_case.result,
            feedback: new_case.feedback,
            redaction_policy_version: new_case.redaction_policy_version,
            created_at: Utc::now(),
        };
        let mut state = self.lock();
        state.cases.insert(case_id, case);
        state.events.insert(case_id, Vec::new());
        Ok(case_id)
    }

    async fn get_case(&self, case_id: Uuid) -> PrismResult<Case> {
        self.lock()
            .cases
            .get(&case_id)
            .cloned()
            .ok_or_else(|| PrismError::NotFound(format!("case {case_id}")))
    }

    async fn list_case_events(&self, case_id: Uuid) -> PrismResult<Vec<CaseEvent>> {
        let mut events = self
            .lock()
            .events
            .get(&case_id)
            .cloned()
            .ok_or_else(|| PrismError::NotFound(format!("case {case_id}")))?;
        events.sort_by_key(|event| (event.ts, event.seq));
        Ok(events)
    }

    async fn append_case_events(&self, case_id: Uuid, events: Vec<CaseEvent>) -> PrismResult<()> {
        for event in &events {
            self.guard(&serde_json::to_value(event)?)?;
        }
        let mut state = self.lock();
        if !state.cases.contains_key(&case_id) {
            return Err(PrismError::NotFound(format!("case {case_id}")));
        }
        let journal = state.events.entry(case_id).or_default();
        let mut next_seq = journal.iter().filter_map(|event| event.seq).max().unwrap_or(0) + 1;
        for mut event in events {
            event.case_id = case_id;
            event.seq = Some(next_seq);
            next_seq += 1;
            journal.push(event);
        }
        Ok(())
    }

    async fn create_court_run(&self, case_id: Uuid, model: &str) -> PrismResult<Uuid> {
        let mut state = self.lock();
        if !state.cases.contains_key(&case_id) {
            return Err(PrismError::NotFound(format!("case {case_id}")));
        }
        let run_id = Uuid::new_v4();
        state.court_runs.insert(
            run_id,
            CourtRun {
                id: run_id,
                case_id,
                model: model.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                status: CourtRunStatus::Running,
                artifacts: None,
            },
        );
        Ok(run_id)
    }

    async fn get_court_run(&self, court_run_id: Uuid) -> PrismResult<CourtRun> {
        self.lock()
            .court_runs
            .get(&court_run_id)
            .cloned()
            .ok_or_else(|| PrismError::NotFound(format!("court_run {court_run_id}")))
    }

    async fn finish_court_run(
        &self,
        court_run_id: Uuid,
        status: CourtRunStatus,
        artifacts: Value,
    ) -> PrismResult<()> {
        self.guard(&artifacts)?;
        let mut state = self.lock();
        let run = state
            .court_runs
            .get_mut(&court_run_id)
            .ok_or_else(|| PrismError::NotFound(format!("court_run {court_run_id}")))?;
        run.status = status;
        run.ended_at = Some(Utc::now());
        run.artifacts = Some(artifacts);
        Ok(())
    }

    async fn store_judgement(
        &self,
        case_id: Uuid,
        court_run_id: Uuid,
        decision: Value,
    ) -> PrismResult<Uuid> {
        self.guard(&decision)?;
        let judgement_id = Uuid::new_v4();
        self.lock()
            .judgements
            .insert(judgement_id, (case_id, court_run_id, decision));
        Ok(judgement_id)
    }

    async fn store_lesson(
        &self,
        case_id: Option<Uuid>,
        lesson: &Lesson,
        embedding: Option<&EmbeddingResult>,
    ) -> PrismResult<Uuid> {
        self.guard(&serde_json::to_value(lesson)?)?;
        let lesson_id = Uuid::new_v4();
        let record = LessonRecord {
            id: lesson_id,
            case_id,
            lesson: lesson.clone(),
            embedding_model: embedding.map(|e| e.model.clone()),
            embedding_dim: embedding.map(|e| e.dimensions as i32),
            created_at: Utc::now(),
        };
        self.lock()
            .lessons
            .insert(lesson_id, (record, embedding.map(|e| e.vector.clone())));
        Ok(lesson_id)
    }

    async fn search_lessons(
        &self,
        role: &str,
        query: &EmbeddingResult,
        k: usize,
    ) -> PrismResult<Vec<LessonSearchHit>> {
        if k == 0 {
            return Ok(vec![]);
        }
        let state = self.lock();
        let mut hits: Vec<LessonSearchHit> = state
            .lessons
            .values()
            .filter(|(record, _)| {
                record.lesson.role == role
                    && record.embedding_model.as_deref() == Some(query.model.as_str())
                    && record.embedding_dim == Some(query.dimensions as i32)
            })
            .filter_map(|(record, vector)| {
                vector.as_ref().map(|vector| LessonSearchHit {
                    record: record.clone(),
                    distance: l2_distance(vector, &query.vector),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn store_prompt_update(
        &self,
        case_id: Option<Uuid>,
        proposal: &PromptUpdateProposal,
    ) -> PrismResult<Uuid> {
        self.guard(&serde_json::to_value(proposal)?)?;
        let id = Uuid::new_v4();
        self.lock().prompt_updates.insert(
            id,
            PromptUpdateRecord {
                id,
                case_id,
                agent_id: proposal.agent_id.clone(),
                role: proposal.role.clone(),
                from_version: proposal.from_version.clone(),
                proposal: proposal.proposal.clone(),
                reason: proposal.reason.clone(),
                status: PromptUpdateStatus::Proposed,
                review_comment: None,
                approved_by: None,
                approved_at: None,
                applied_at: None,
                evidence_event_ids: proposal.evidence_event_ids.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get_prompt_update(&self, id: Uuid) -> PrismResult<PromptUpdateRecord> {
        self.lock()
            .prompt_updates
            .get(&id)
            .cloned()
            .ok_or_else(|| PrismError::NotFound(format!("prompt_update {id}")))
    }

    async fn review_prompt_update(
        &self,
        id: Uuid,
        approve: bool,
        review_comment: Option<String>,
        approved_by: Option<String>,
    ) -> PrismResult<()> {
        self.guard(&serde_json::json!({
            "review_comment": review_comment,
            "approved_by": approved_by,
        }))?;
        let mut state = self.lock();
        let record = state
            .prompt_updates
            .get_mut(&id)
            .ok_or_else(|| PrismError::NotFound(format!("prompt_update {id}")))?;
        let next = if approve {
            PromptUpdateStatus::Approved
        } else {
            PromptUpdateStatus::Rejected
        };
        if !record.status.can_transition(next) {
            return Err(PrismError::InvalidState(format!(
                "prompt_update {id} cannot move {} -> {}",
                record.status.as_str(),
                next.as_str()
            )));
        }
        record.status = next;
        record.review_comment = review_comment;
        if approve {
            record.approved_by = approved_by;
            record.approved_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn apply_prompt_update(&self, id: Uuid) -> PrismResult<i32> {
        // The single lock gives the same one-winner guarantee row locking
        // gives the Postgres adapter.
        let mut state = self.lock();
        let record = state
            .prompt_updates
            .get(&id)
            .cloned()
            .ok_or_else(|| PrismError::NotFound(format!("prompt_update {id}")))?;
        if record.status != PromptUpdateStatus::Approved {
            return Err(PrismError::InvalidState(format!(
                "prompt_update {id} must be approved before apply (status={})",
                record.status.as_str()
            )));
        }

        let new_version = state
            .role_prompts
            .iter()
            .filter(|prompt| prompt.role == record.role)
            .map(|prompt| prompt.version)
            .max()
            .unwrap_or(0)
            + 1;
        let new_id = Uuid::new_v4();
        for prompt in &mut state.role_prompts {
            if prompt.role == record.role && prompt.is_active {
                prompt.is_active = false;
            }
        }
        state.role_prompts.push(RolePrompt {
            id: new_id,
            role: record.role.clone(),
            version: new_version,
            prompt: record.proposal.clone(),
            is_active: true,
            created_at: Utc::now(),
        });
        if let Some(record) = state.prompt_updates.get_mut(&id) {
            record.status = PromptUpdateStatus::Applied;
            record.applied_at = Some(Utc::now());
        }
        Ok(new_version)
    }

    async fn active_role_prompt(&self, role: &str) -> PrismResult<Option<RolePrompt>> {
        Ok(self
            .lock()
            .role_prompts
            .iter()
            .find(|prompt| prompt.role == role && prompt.is_active)
            .cloned())
    }
}
