//! Court orchestration: parallel three-stage debate, sequential judge,
//! per-stage journaling, and judge-gated persistence.
//!
//! Stage failures are values — one stage blowing up never cancels its
//! siblings, and the judge always runs with whatever survived. Everything
//! persisted here has already been through the redactor; the store's guard
//! is the second, non-negotiable line.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::court::models::{
    ActorType, CaseEvent, CourtRunStatus, EventType, JudgeOutput, Stage, StageOutput, json_compact,
};
use crate::court::runner::{validate_stage_output, AgentRunner};
use crate::court::tools::{case_context, event_context, CourtTools};
use crate::error::PrismResult;
use crate::lessons::LessonService;
use crate::redaction::Redactor;
use crate::storage::CourtStore;

#[derive(Debug, Clone, Serialize)]
pub struct CourtRunSummary {
    pub case_id: Uuid,
    pub court_run_id: Uuid,
    pub status: CourtRunStatus,
}

/// Progress events surfaced to streaming consumers (the SSE endpoint).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CourtStreamEvent {
    Start {
        case_id: Uuid,
        court_run_id: Uuid,
    },
    StageStart {
        stage: Stage,
    },
    StageComplete {
        stage: Stage,
        ok: bool,
    },
    Complete {
        case_id: Uuid,
        court_run_id: Uuid,
        status: CourtRunStatus,
    },
}

impl CourtStreamEvent {
    /// The SSE `event:` name.
    pub fn kind(&self) -> &'static str {
        match self {
            CourtStreamEvent::Start { .. } => "start",
            CourtStreamEvent::StageStart { .. } => "stage_start",
            CourtStreamEvent::StageComplete { .. } => "stage_complete",
            CourtStreamEvent::Complete { .. } => "complete",
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<CourtStreamEvent>;

fn emit(progress: Option<&ProgressSender>, event: CourtStreamEvent) {
    if let Some(sender) = progress {
        let _ = sender.send(event);
    }
}

struct StageResult {
    output: Option<Value>,
    usage: Option<Value>,
    error: Option<String>,
}

pub struct CourtOrchestrator {
    store: Arc<dyn CourtStore>,
    runner: Arc<dyn AgentRunner>,
    redactor: Arc<Redactor>,
    lessons: Arc<LessonService>,
}

impl CourtOrchestrator {
    pub fn new(
        store: Arc<dyn CourtStore>,
        runner: Arc<dyn AgentRunner>,
        redactor: Arc<Redactor>,
        lessons: Arc<LessonService>,
    ) -> Self {
        Self {
            store,
            runner,
            redactor,
            lessons,
        }
    }

    pub async fn run_case(&self, case_id: Uuid, model: &str) -> PrismResult<CourtRunSummary> {
        let (_tx, rx) = watch::channel(false);
        self.run_case_with_cancel(case_id, model, rx).await
    }

    /// Run the court with an external cancel signal. On cancellation the
    /// in-flight stages are dropped, the cancellation is journaled, and the
    /// run finalizes with `status = failed`.
    pub async fn run_case_with_cancel(
        &self,
        case_id: Uuid,
        model: &str,
        cancel: watch::Receiver<bool>,
    ) -> PrismResult<CourtRunSummary> {
        self.run_case_with_progress(case_id, model, cancel, None).await
    }

    /// Like [`run_case_with_cancel`], additionally emitting
    /// [`CourtStreamEvent`]s on the given channel as stages start and finish.
    pub async fn run_case_with_progress(
        &self,
        case_id: Uuid,
        model: &str,
        cancel: watch::Receiver<bool>,
        progress: Option<ProgressSender>,
    ) -> PrismResult<CourtRunSummary> {
        let progress = progress.as_ref();
        let case = self.store.get_case(case_id).await?;
        let case_events = self.store.list_case_events(case_id).await?;

        let court_run_id = self.store.create_court_run(case_id, model).await?;
        emit(
            progress,
            CourtStreamEvent::Start {
                case_id,
                court_run_id,
            },
        );
        let tools = CourtTools::new(
            self.store.clone(),
            self.redactor.clone(),
            self.lessons.clone(),
            case_id,
        );

        let base_context = json!({
            "case": case_context(&case, &self.redactor),
            "events": case_events
                .iter()
                .map(|event| event_context(event, &self.redactor))
                .collect::<Vec<_>>(),
        });
        let context_event_ids: HashSet<String> = case_events
            .iter()
            .map(|event| event.id.to_string())
            .collect();

        info!(%case_id, %court_run_id, model, "court run started");

        // Fan out. No ordering among the three; the join is the only barrier.
        let fanout = async {
            tokio::join!(
                self.run_stage(case_id, court_run_id, Stage::Prosecutor, &tools, &base_context, progress),
                self.run_stage(case_id, court_run_id, Stage::Defense, &tools, &base_context, progress),
                self.run_stage(case_id, court_run_id, Stage::Jury, &tools, &base_context, progress),
            )
        };
        let (prosecutor, defense, jury) = {
            let mut cancel_watch = cancel.clone();
            tokio::select! {
                results = fanout => results,
                _ = cancelled(&mut cancel_watch) => {
                    return self
                        .finalize_cancelled(case_id, court_run_id, &base_context)
                        .await;
                }
            }
        };

        let mut stage_outputs = Map::new();
        let mut stage_errors = Map::new();
        let mut stage_usages = Map::new();
        for (stage, result) in Stage::FANOUT.iter().zip([&prosecutor, &defense, &jury]) {
            let key = stage.as_str().to_string();
            match &result.error {
                Some(error) => {
                    stage_errors.insert(key.clone(), Value::String(error.clone()));
                    stage_outputs.insert(key, Value::Null);
                }
                None => {
                    stage_outputs.insert(key.clone(), result.output.clone().unwrap_or(Value::Null));
                    if let Some(usage) = &result.usage {
                        stage_usages.insert(key, usage.clone());
                    }
                }
            }
        }

        let judge_input = json!({
            "case": base_context["case"],
            "events": base_context["events"],
            "stage_outputs": Value::Object(stage_outputs.clone()),
            "stage_errors": Value::Object(stage_errors.clone()),
        });
        let judge = {
            let judge_fut =
                self.run_stage(case_id, court_run_id, Stage::Judge, &tools, &judge_input, progress);
            let mut cancel_watch = cancel.clone();
            tokio::select! {
                result = judge_fut => result,
                _ = cancelled(&mut cancel_watch) => {
                    return self
                        .finalize_cancelled(case_id, court_run_id, &base_context)
                        .await;
                }
            }
        };

        let mut errors = stage_errors.clone();
        errors.insert(
            "judge".to_string(),
            judge.error.clone().map(Value::String).unwrap_or(Value::Null),
        );
        let mut usage = stage_usages.clone();
        usage.insert(
            "judge".to_string(),
            judge.usage.clone().unwrap_or(Value::Null),
        );

        let mut stages = stage_outputs.clone();
        stages.insert(
            "judge".to_string(),
            judge.output.clone().unwrap_or(Value::Null),
        );
        let artifacts = json!({
            "context": base_context,
            "stages": Value::Object(stages),
            "errors": self.redactor.redact(&Value::Object(errors)),
            "usage": Value::Object(usage),
        });

        let status = if stage_errors.is_empty() && judge.error.is_none() {
            CourtRunStatus::Completed
        } else {
            CourtRunStatus::CompletedWithErrors
        };

        // Judge-derived persistence happens only on a valid judge output.
        if judge.error.is_none() {
            if let Some(output) = &judge.output {
                self.persist_judgement(case_id, court_run_id, output, &context_event_ids)
                    .await?;
            }
        }

        self.store
            .finish_court_run(court_run_id, status, artifacts.clone())
            .await?;

        let mut final_event = CaseEvent::new(
            case_id,
            ActorType::System,
            EventType::Artifact,
            "Court run finished",
        );
        final_event.actor_id = Some("court_orchestrator".to_string());
        final_event.stage = Some(Stage::Judge.as_str().to_string());
        final_event.court_run_id = Some(court_run_id);
        final_event.meta = Some(json!({"artifacts": artifacts, "status": status.as_str()}));
        self.store
            .append_case_events(case_id, vec![self.redact_event(final_event)])
            .await?;

        info!(%case_id, %court_run_id, status = status.as_str(), "court run finished");
        emit(
            progress,
            CourtStreamEvent::Complete {
                case_id,
                court_run_id,
                status,
            },
        );
        Ok(CourtRunSummary {
            case_id,
            court_run_id,
            status,
        })
    }

    async fn run_stage(
        &self,
        case_id: Uuid,
        court_run_id: Uuid,
        stage: Stage,
        tools: &CourtTools,
        input: &Value,
        progress: Option<&ProgressSender>,
    ) -> StageResult {
        emit(progress, CourtStreamEvent::StageStart { stage });
        let mut call_event = CaseEvent::new(
            case_id,
            ActorType::System,
            EventType::ModelCall,
            format!("{stage} started"),
        );
        call_event.actor_id = Some("court_orchestrator".to_string());
        call_event.stage = Some(stage.as_str().to_string());
        call_event.court_run_id = Some(court_run_id);
        call_event.meta = Some(json!({
            "stage": stage.as_str(),
            "input_bytes": json_compact(input).len(),
        }));
        if let Err(e) = self
            .store
            .append_case_events(case_id, vec![self.redact_event(call_event)])
            .await
        {
            emit(progress, CourtStreamEvent::StageComplete { stage, ok: false });
            return StageResult {
                output: None,
                usage: None,
                error: Some(self.redactor.redact_str(&e.to_string())),
            };
        }

        match self.execute_stage(stage, tools, input).await {
            Ok((output, usage, meta)) => {
                let mut result_event = CaseEvent::new(
                    case_id,
                    ActorType::System,
                    EventType::ModelResult,
                    format!("{stage} finished"),
                );
                result_event.actor_id = Some("court_orchestrator".to_string());
                result_event.stage = Some(stage.as_str().to_string());
                result_event.court_run_id = Some(court_run_id);
                result_event.usage = usage.clone();
                result_event.meta = meta;

                let mut artifact_event = CaseEvent::new(
                    case_id,
                    ActorType::Ai,
                    EventType::Artifact,
                    format!("{stage} output"),
                );
                artifact_event.actor_id = Some(stage.as_str().to_string());
                artifact_event.role = Some(stage.as_str().to_string());
                artifact_event.stage = Some(stage.as_str().to_string());
                artifact_event.court_run_id = Some(court_run_id);
                artifact_event.meta = Some(json!({"output": output}));

                if let Err(e) = self
                    .store
                    .append_case_events(
                        case_id,
                        vec![
                            self.redact_event(result_event),
                            self.redact_event(artifact_event),
                        ],
                    )
                    .await
                {
                    emit(progress, CourtStreamEvent::StageComplete { stage, ok: false });
                    return StageResult {
                        output: None,
                        usage: None,
                        error: Some(self.redactor.redact_str(&e.to_string())),
                    };
                }

                emit(progress, CourtStreamEvent::StageComplete { stage, ok: true });
                StageResult {
                    output: Some(output),
                    usage,
                    error: None,
                }
            }
            Err(e) => {
                let message = self.redactor.redact_str(&e.to_string());
                warn!(stage = stage.as_str(), error = %message, "stage failed");
                let mut error_event = CaseEvent::new(
                    case_id,
                    ActorType::System,
                    EventType::Error,
                    format!("{stage} failed"),
                );
                error_event.actor_id = Some("court_orchestrator".to_string());
                error_event.stage = Some(stage.as_str().to_string());
                error_event.court_run_id = Some(court_run_id);
                error_event.meta = Some(json!({"error": message}));
                if let Err(append_err) = self
                    .store
                    .append_case_events(case_id, vec![self.redact_event(error_event)])
                    .await
                {
                    warn!(error = %append_err, "failed to journal stage error");
                }
                emit(progress, CourtStreamEvent::StageComplete { stage, ok: false });
                StageResult {
                    output: None,
                    usage: None,
                    error: Some(message),
                }
            }
        }
    }

    /// Run the agent, validate against the stage schema, parse into the
    /// typed output, and redact. Returns the redacted output value.
    async fn execute_stage(
        &self,
        stage: Stage,
        tools: &CourtTools,
        input: &Value,
    ) -> PrismResult<(Value, Option<Value>, Option<Value>)> {
        let result = self.runner.run(stage, input, tools).await?;
        validate_stage_output(stage, &result.output)?;
        let parsed = StageOutput::parse(stage, result.output)?;
        let redacted_output = self.redactor.redact(&parsed.to_value());
        let redacted_usage = result.usage.map(|usage| self.redactor.redact(&usage));
        let redacted_meta = result.meta.map(|meta| self.redactor.redact(&meta));
        Ok((redacted_output, redacted_usage, redacted_meta))
    }

    async fn persist_judgement(
        &self,
        case_id: Uuid,
        court_run_id: Uuid,
        judge_output: &Value,
        context_event_ids: &HashSet<String>,
    ) -> PrismResult<()> {
        let parsed = StageOutput::parse(Stage::Judge, judge_output.clone())?;
        let Some(judge) = parsed.as_judge() else {
            return Ok(());
        };
        let filtered = filter_evidence(judge, context_event_ids);

        let decision = self.redactor.redact(&serde_json::to_value(&filtered)?);
        self.store
            .store_judgement(case_id, court_run_id, decision)
            .await?;

        for lesson in &filtered.selected_lessons {
            let duplicates = self.lessons.find_duplicate_candidates(lesson).await?;
            if let Some(existing) = duplicates.first() {
                info!(
                    title = %lesson.title,
                    existing = %existing.record.id,
                    "suppressing near-duplicate lesson"
                );
                continue;
            }
            if let Err(e) = self.lessons.insert_lesson(Some(case_id), lesson).await {
                warn!(title = %lesson.title, error = %e, "lesson insert refused");
            }
        }

        for proposal in &filtered.prompt_update_proposals {
            self.store
                .store_prompt_update(Some(case_id), proposal)
                .await?;
        }
        Ok(())
    }

    async fn finalize_cancelled(
        &self,
        case_id: Uuid,
        court_run_id: Uuid,
        base_context: &Value,
    ) -> PrismResult<CourtRunSummary> {
        warn!(%case_id, %court_run_id, "court run cancelled");
        let mut error_event = CaseEvent::new(
            case_id,
            ActorType::System,
            EventType::Error,
            "court run cancelled",
        );
        error_event.actor_id = Some("court_orchestrator".to_string());
        error_event.court_run_id = Some(court_run_id);
        self.store
            .append_case_events(case_id, vec![self.redact_event(error_event)])
            .await?;

        let artifacts = json!({
            "context": base_context,
            "stages": {},
            "errors": {"run": "cancelled"},
            "usage": {},
        });
        self.store
            .finish_court_run(court_run_id, CourtRunStatus::Failed, artifacts)
            .await?;
        Ok(CourtRunSummary {
            case_id,
            court_run_id,
            status: CourtRunStatus::Failed,
        })
    }

    fn redact_event(&self, mut event: CaseEvent) -> CaseEvent {
        event.content = self.redactor.redact_str(&event.content);
        event.meta = event.meta.map(|meta| self.redactor.redact(&meta));
        event.usage = event.usage.map(|usage| self.redactor.redact(&usage));
        event
    }
}

/// Evidence ids not present in the input context are dropped before
/// persistence; the reference is one-way and resolved on read.
fn filter_evidence(judge: &JudgeOutput, context_event_ids: &HashSet<String>) -> JudgeOutput {
    let mut filtered = judge.clone();
    for lesson in &mut filtered.selected_lessons {
        lesson
            .evidence_event_ids
            .retain(|id| context_event_ids.contains(id));
    }
    for deferred in &mut filtered.deferred_lessons {
        deferred
            .lesson
            .evidence_event_ids
            .retain(|id| context_event_ids.contains(id));
    }
    for proposal in &mut filtered.prompt_update_proposals {
        proposal
            .evidence_event_ids
            .retain(|id| context_event_ids.contains(id));
    }
    filtered
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender dropped without cancelling; park forever so the select
            // resolves through the work branch.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::court::models::{Lesson, Polarity};

    #[test]
    fn evidence_outside_context_is_dropped() {
        let judge = JudgeOutput {
            selected_lessons: vec![Lesson {
                role: "response".into(),
                polarity: Polarity::Dont,
                title: "t".into(),
                content: "c".into(),
                rationale: None,
                confidence: None,
                tags: vec![],
                evidence_event_ids: vec!["known".into(), "forged".into()],
                supersedes_lesson_id: None,
            }],
            deferred_lessons: vec![],
            prompt_update_proposals: vec![],
            user_improvement_suggestions: vec![],
            system_improvement_suggestions: vec![],
        };
        let context: HashSet<String> = ["known".to_string()].into_iter().collect();
        let filtered = filter_evidence(&judge, &context);
        assert_eq!(
            filtered.selected_lessons[0].evidence_event_ids,
            vec!["known".to_string()]
        );
    }
}
