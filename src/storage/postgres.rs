//! Postgres adapter for the court store.
//!
//! All SQL is runtime-checked (`sqlx::query`, not the compile-time macros) so
//! builds never require a live database. Embeddings go through pgvector.

use pgvector::Vector;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::court::models::{
    ActorType, Case, CaseEvent, CourtRun, CourtRunStatus, EventType, Lesson, Polarity,
    PromptUpdateProposal,
};
use crate::embeddings::EmbeddingResult;
use crate::error::{PrismError, PrismResult};
use crate::redaction::Redactor;
use crate::storage::{
    CourtStore, LessonRecord, LessonSearchHit, NewCase, PromptUpdateRecord, PromptUpdateStatus,
    RolePrompt,
};

pub struct PgCourtStore {
    pool: PgPool,
    redactor: Arc<Redactor>,
}

impl PgCourtStore {
    pub fn new(pool: PgPool, redactor: Arc<Redactor>) -> Self {
        Self { pool, redactor }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn guard(&self, value: &Value) -> PrismResult<()> {
        self.redactor.assert_no_sensitive_data(value)
    }
}

fn parse_actor_type(raw: &str) -> ActorType {
    match raw {
        "human" => ActorType::Human,
        "ai" => ActorType::Ai,
        "tool" => ActorType::Tool,
        _ => ActorType::System,
    }
}

fn parse_event_type(raw: &str) -> EventType {
    match raw {
        "model_call" => EventType::ModelCall,
        "model_result" => EventType::ModelResult,
        "artifact" => EventType::Artifact,
        "error" => EventType::Error,
        "feedback" => EventType::Feedback,
        _ => EventType::Note,
    }
}

fn parse_status(raw: &str) -> CourtRunStatus {
    match raw {
        "completed" => CourtRunStatus::Completed,
        "completed_with_errors" => CourtRunStatus::CompletedWithErrors,
        "failed" => CourtRunStatus::Failed,
        _ => CourtRunStatus::Running,
    }
}

fn parse_polarity(raw: &str) -> PrismResult<Polarity> {
    match raw {
        "do" => Ok(Polarity::Do),
        "dont" => Ok(Polarity::Dont),
        other => Err(PrismError::InvalidState(format!(
            "invalid lesson polarity in storage: {other}"
        ))),
    }
}

#[async_trait::async_trait]
impl CourtStore for PgCourtStore {
    async fn create_case(&self, new_case: NewCase) -> PrismResult<Uuid> {
        self.guard(&new_case.source)?;
        self.guard(&new_case.metadata)?;
        let case_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO cases (id, source, metadata, result, feedback, redaction_policy_version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(case_id)
        .bind(&new_case.source)
        .bind(&new_case.metadata)
        .bind(&new_case.result)
        .bind(&new_case.feedback)
        .bind(&new_case.redaction_policy_version)
        .execute(&self.pool)
        .await?;
        Ok(case_id)
    }

    async fn get_case(&self, case_id: Uuid) -> PrismResult<Case> {
        let row = sqlx::query(
            r#"
            SELECT id, source, metadata, result, feedback, redaction_policy_version, created_at
            FROM cases
            WHERE id = $1
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PrismError::NotFound(format!("case {case_id}")))?;

        Ok(Case {
            id: row.try_get("id")?,
            source: row.try_get("source")?,
            metadata: row.try_get("metadata")?,
            result: row.try_get("result")?,
            feedback: row.try_get("feedback")?,
            redaction_policy_version: row.try_get("redaction_policy_version")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn list_case_events(&self, case_id: Uuid) -> PrismResult<Vec<CaseEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, case_id, court_run_id, ts, seq, actor_type, actor_id, role, stage,
                   event_type, content, meta, usage
            FROM case_events
            WHERE case_id = $1
            ORDER BY ts, seq
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let actor_type: String = row.try_get("actor_type")?;
            let event_type: String = row.try_get("event_type")?;
            events.push(CaseEvent {
                id: row.try_get("id")?,
                case_id: row.try_get("case_id")?,
                court_run_id: row.try_get("court_run_id")?,
                ts: row.try_get("ts")?,
                seq: row.try_get("seq")?,
                actor_type: parse_actor_type(&actor_type),
                actor_id: row.try_get("actor_id")?,
                role: row.try_get("role")?,
                stage: row.try_get("stage")?,
                event_type: parse_event_type(&event_type),
                content: row.try_get("content")?,
                meta: row.try_get("meta")?,
                usage: row.try_get("usage")?,
            });
        }
        Ok(events)
    }

    async fn append_case_events(&self, case_id: Uuid, events: Vec<CaseEvent>) -> PrismResult<()> {
        for event in &events {
            self.guard(&serde_json::to_value(event)?)?;
        }

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let locked = sqlx::query("SELECT 1 FROM cases WHERE id = $1 FOR UPDATE")
            .bind(case_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(PrismError::NotFound(format!("case {case_id}")));
        }
        let max_seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM case_events WHERE case_id = $1")
                .bind(case_id)
                .fetch_one(&mut *tx)
                .await?;

        for (offset, event) in events.into_iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO case_events (
                  id, case_id, court_run_id, ts, seq, actor_type, actor_id, role, stage,
                  event_type, content, meta, usage
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(event.id)
            .bind(case_id)
            .bind(event.court_run_id)
            .bind(event.ts)
            .bind(max_seq + 1 + offset as i64)
            .bind(event.actor_type.as_str())
            .bind(&event.actor_id)
            .bind(&event.role)
            .bind(&event.stage)
            .bind(event.event_type.as_str())
            .bind(&event.content)
            .bind(&event.meta)
            .bind(&event.usage)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_court_run(&self, case_id: Uuid, model: &str) -> PrismResult<Uuid> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO court_runs (id, case_id, model, started_at, status)
            VALUES ($1, $2, $3, now(), 'running')
            "#,
        )
        .bind(run_id)
        .bind(case_id)
        .bind(model)
        .execute(&self.pool)
        .await?;
        Ok(run_id)
    }

    async fn get_court_run(&self, court_run_id: Uuid) -> PrismResult<CourtRun> {
        let row = sqlx::query(
            r#"
            SELECT id, case_id, model, started_at, ended_at, status, artifacts
            FROM court_runs
            WHERE id = $1
            "#,
        )
        .bind(court_run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PrismError::NotFound(format!("court_run {court_run_id}")))?;

        let status: String = row.try_get("status")?;
        Ok(CourtRun {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            model: row.try_get("model")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            status: parse_status(&status),
            artifacts: row.try_get("artifacts")?,
        })
    }

    async fn finish_court_run(
        &self,
        court_run_id: Uuid,
        status: CourtRunStatus,
        artifacts: Value,
    ) -> PrismResult<()> {
        self.guard(&artifacts)?;
        let result = sqlx::query(
            r#"
            UPDATE court_runs
            SET ended_at = now(), status = $1, artifacts = $2
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(&artifacts)
        .bind(court_run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PrismError::NotFound(format!("court_run {court_run_id}")));
        }
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
        sqlx::query(
            r#"
            INSERT INTO judgements (id, case_id, court_run_id, decision)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(judgement_id)
        .bind(case_id)
        .bind(court_run_id)
        .bind(&decision)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            INSERT INTO lessons (
              id, case_id, role, polarity, title, content, rationale, confidence,
              tags, evidence_event_ids, embedding, embedding_model, embedding_dim,
              supersedes_lesson_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(lesson_id)
        .bind(case_id)
        .bind(&lesson.role)
        .bind(lesson.polarity.as_str())
        .bind(&lesson.title)
        .bind(&lesson.content)
        .bind(&lesson.rationale)
        .bind(lesson.confidence.map(|c| c as f32))
        .bind(&lesson.tags)
        .bind(&lesson.evidence_event_ids)
        .bind(embedding.map(|e| Vector::from(e.vector.clone())))
        .bind(embedding.map(|e| e.model.clone()))
        .bind(embedding.map(|e| e.dimensions as i32))
        .bind(lesson.supersedes_lesson_id)
        .execute(&self.pool)
        .await?;
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
        let query_vector = Vector::from(query.vector.clone());
        let rows = sqlx::query(
            r#"
            SELECT id, case_id, role, polarity, title, content, rationale, confidence,
                   tags, evidence_event_ids, embedding_model, embedding_dim, created_at,
                   supersedes_lesson_id,
                   embedding <-> $1 AS distance
            FROM lessons
            WHERE role = $2
              AND embedding IS NOT NULL
              AND embedding_model = $3
              AND embedding_dim = $4
            ORDER BY embedding <-> $1
            LIMIT $5
            "#,
        )
        .bind(&query_vector)
        .bind(role)
        .bind(&query.model)
        .bind(query.dimensions as i32)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let polarity: String = row.try_get("polarity")?;
            let confidence: Option<f32> = row.try_get("confidence")?;
            let tags: Option<Vec<String>> = row.try_get("tags")?;
            let evidence: Option<Vec<String>> = row.try_get("evidence_event_ids")?;
            let distance: f64 = row.try_get("distance")?;
            hits.push(LessonSearchHit {
                record: LessonRecord {
                    id: row.try_get("id")?,
                    case_id: row.try_get("case_id")?,
                    lesson: Lesson {
                        role: row.try_get("role")?,
                        polarity: parse_polarity(&polarity)?,
                        title: row.try_get("title")?,
                        content: row.try_get("content")?,
                        rationale: row.try_get("rationale")?,
                        confidence: confidence.map(|c| c as f64),
                        tags: tags.unwrap_or_default(),
                        evidence_event_ids: evidence.unwrap_or_default(),
                        supersedes_lesson_id: row.try_get("supersedes_lesson_id")?,
                    },
                    embedding_model: row.try_get("embedding_model")?,
                    embedding_dim: row.try_get("embedding_dim")?,
                    created_at: row.try_get("created_at")?,
                },
                distance: distance as f32,
            });
        }
        Ok(hits)
    }

    async fn store_prompt_update(
        &self,
        case_id: Option<Uuid>,
        proposal: &PromptUpdateProposal,
    ) -> PrismResult<Uuid> {
        self.guard(&serde_json::to_value(proposal)?)?;
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO prompt_updates (
              id, case_id, agent_id, role, from_version, proposal, reason,
              evidence_event_ids, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'proposed')
            "#,
        )
        .bind(id)
        .bind(case_id)
        .bind(&proposal.agent_id)
        .bind(&proposal.role)
        .bind(&proposal.from_version)
        .bind(&proposal.proposal)
        .bind(&proposal.reason)
        .bind(&proposal.evidence_event_ids)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_prompt_update(&self, id: Uuid) -> PrismResult<PromptUpdateRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, case_id, agent_id, role, from_version, proposal, reason, status,
                   review_comment, approved_by, approved_at, applied_at,
                   evidence_event_ids, created_at
            FROM prompt_updates
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PrismError::NotFound(format!("prompt_update {id}")))?;

        let status: String = row.try_get("status")?;
        let evidence: Option<Vec<String>> = row.try_get("evidence_event_ids")?;
        Ok(PromptUpdateRecord {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            agent_id: row.try_get("agent_id")?,
            role: row.try_get("role")?,
            from_version: row.try_get("from_version")?,
            proposal: row.try_get("proposal")?,
            reason: row.try_get("reason")?,
            status: PromptUpdateStatus::parse(&status).ok_or_else(|| {
                PrismError::InvalidState(format!("unknown prompt_update status {status}"))
            })?,
            review_comment: row.try_get("review_comment")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
            applied_at: row.try_get("applied_at")?,
            evidence_event_ids: evidence.unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
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
        let next = if approve {
            PromptUpdateStatus::Approved
        } else {
            PromptUpdateStatus::Rejected
        };

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT status FROM prompt_updates WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| PrismError::NotFound(format!("prompt_update {id}")))?;
        let status: String = row.try_get("status")?;
        let current = PromptUpdateStatus::parse(&status).ok_or_else(|| {
            PrismError::InvalidState(format!("unknown prompt_update status {status}"))
        })?;
        if !current.can_transition(next) {
            return Err(PrismError::InvalidState(format!(
                "prompt_update {id} cannot move {} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }

        sqlx::query(
            r#"
            UPDATE prompt_updates
            SET status = $1,
                review_comment = $2,
                approved_by = CASE WHEN $4 THEN $3 ELSE approved_by END,
                approved_at = CASE WHEN $4 THEN now() ELSE approved_at END
            WHERE id = $5
            "#,
        )
        .bind(next.as_str())
        .bind(&review_comment)
        .bind(&approved_by)
        .bind(approve)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_prompt_update(&self, id: Uuid) -> PrismResult<i32> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT role, proposal, status FROM prompt_updates WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PrismError::NotFound(format!("prompt_update {id}")))?;

        let role: String = row.try_get("role")?;
        let proposal: String = row.try_get("proposal")?;
        let status: String = row.try_get("status")?;
        if status != "approved" {
            return Err(PrismError::InvalidState(format!(
                "prompt_update {id} must be approved before apply (status={status})"
            )));
        }

        let max_version: i32 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM role_prompts WHERE role = $1")
                .bind(&role)
                .fetch_one(&mut *tx)
                .await?;
        let new_version = max_version + 1;

        let new_prompt_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO role_prompts (id, role, version, prompt, is_active)
            VALUES ($1, $2, $3, $4, true)
            "#,
        )
        .bind(new_prompt_id)
        .bind(&role)
        .bind(new_version)
        .bind(&proposal)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE role_prompts
            SET is_active = false
            WHERE role = $1 AND id <> $2 AND is_active = true
            "#,
        )
        .bind(&role)
        .bind(new_prompt_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE prompt_updates SET status = 'applied', applied_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(new_version)
    }

    async fn active_role_prompt(&self, role: &str) -> PrismResult<Option<RolePrompt>> {
        let row = sqlx::query(
            r#"
            SELECT id, role, version, prompt, is_active, created_at
            FROM role_prompts
            WHERE role = $1 AND is_active = true
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(RolePrompt {
                id: row.try_get("id")?,
                role: row.try_get("role")?,
                version: row.try_get("version")?,
                prompt: row.try_get("prompt")?,
                is_active: row.try_get("is_active")?,
                created_at: row.try_get("created_at")?,
            })),
        }
    }
}
