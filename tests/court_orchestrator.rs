//! End-to-end court runs over the in-memory store with a scripted runner.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use prism_devrel::court::models::{ActorType, CaseEvent, CourtRunStatus, EventType, Stage};
use prism_devrel::court::orchestrator::CourtOrchestrator;
use prism_devrel::court::runner::{AgentRunner, StageRunResult};
use prism_devrel::court::tools::CourtTools;
use prism_devrel::embeddings::HashEmbedder;
use prism_devrel::error::PrismResult;
use prism_devrel::lessons::LessonService;
use prism_devrel::redaction::{RedactionPolicy, Redactor};
use prism_devrel::storage::{CourtStore, MemoryCourtStore, NewCase, PromptUpdateStatus};

const SECRET: &str = "sk-proj-1234567890abcdef1234567890";

/// Scripted runner mirroring a real debate; stages can be failed or parked
/// forever to exercise error isolation and cancellation.
struct FakeAgentRunner {
    fail_stages: HashSet<Stage>,
    hang: bool,
}

impl FakeAgentRunner {
    fn new() -> Self {
        Self {
            fail_stages: HashSet::new(),
            hang: false,
        }
    }

    fn failing(stages: &[Stage]) -> Self {
        Self {
            fail_stages: stages.iter().copied().collect(),
            hang: false,
        }
    }

    fn hanging() -> Self {
        Self {
            fail_stages: HashSet::new(),
            hang: true,
        }
    }
}

#[async_trait::async_trait]
impl AgentRunner for FakeAgentRunner {
    async fn run(
        &self,
        stage: Stage,
        input: &Value,
        _tools: &CourtTools,
    ) -> PrismResult<StageRunResult> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_stages.contains(&stage) {
            return Err(prism_devrel::PrismError::UpstreamSemantic(format!(
                "boom:{stage}"
            )));
        }

        let evidence: Vec<String> = input
            .get("events")
            .and_then(Value::as_array)
            .and_then(|events| events.first())
            .and_then(|event| event.get("id"))
            .and_then(Value::as_str)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default();

        let output = match stage {
            Stage::Prosecutor => json!({
                "criticisms": ["Too many retries without backoff."],
                "candidate_lessons": [{
                    "role": "coder",
                    "polarity": "dont",
                    "title": "Do not leak secrets",
                    "content": format!("Never paste API keys like {SECRET} into logs."),
                    "rationale": "Leaks cause account compromise.",
                    "confidence": 0.8,
                    "tags": ["security"],
                    "evidence_event_ids": evidence,
                }],
            }),
            Stage::Defense => json!({
                "praises": ["Good use of structured outputs."],
                "candidate_lessons": [],
            }),
            Stage::Jury => json!({
                "observations": ["The timeline has enough evidence events."],
                "risks": ["Some stages may fail; judge should proceed."],
                "missing_info": [],
                "candidate_lessons": [],
            }),
            Stage::Judge => json!({
                "selected_lessons": [{
                    "role": "coder",
                    "polarity": "dont",
                    "title": "Do not leak secrets",
                    "content": format!("Never include API keys like {SECRET} in logs or issues."),
                    "rationale": "Prevent credential compromise.",
                    "confidence": 0.9,
                    "tags": ["security"],
                    "evidence_event_ids": evidence,
                }],
                "deferred_lessons": [],
                "prompt_update_proposals": [{
                    "role": "coder",
                    "agent_id": "agent-1",
                    "from_version": "v1",
                    "proposal": format!("SYSTEM: Never log secrets like {SECRET}."),
                    "reason": "Reduce accidental secret leakage.",
                    "evidence_event_ids": ["not-in-context", evidence.first().cloned().unwrap_or_default()],
                }],
                "user_improvement_suggestions": [],
                "system_improvement_suggestions": [],
            }),
        };

        Ok(StageRunResult {
            output,
            usage: Some(json!({"input_tokens": 12, "output_tokens": 34})),
            meta: None,
        })
    }
}

struct Fixture {
    store: Arc<MemoryCourtStore>,
    orchestrator: CourtOrchestrator,
    case_id: Uuid,
    seed_event_id: Uuid,
}

async fn fixture(runner: FakeAgentRunner) -> Fixture {
    let redactor = Arc::new(Redactor::new(RedactionPolicy::builtin()).unwrap());
    let store = Arc::new(MemoryCourtStore::new(redactor.clone()));
    let embedder = Arc::new(HashEmbedder::new(64));
    let lessons = Arc::new(LessonService::new(
        store.clone() as Arc<dyn CourtStore>,
        embedder,
        redactor.clone(),
    ));
    let orchestrator = CourtOrchestrator::new(
        store.clone() as Arc<dyn CourtStore>,
        Arc::new(runner),
        redactor,
        lessons,
    );

    let case_id = store
        .create_case(NewCase {
            metadata: json!({"note": format!("key {SECRET}")}),
            feedback: json!({"verdict": "rejected", "comment": "wrong assignee"}),
            ..NewCase::default()
        })
        .await
        .unwrap();

    let seed = CaseEvent::new(
        case_id,
        ActorType::Human,
        EventType::Feedback,
        "Reviewer rejected the draft response.",
    );
    let seed_event_id = seed.id;
    store.append_case_events(case_id, vec![seed]).await.unwrap();

    Fixture {
        store,
        orchestrator,
        case_id,
        seed_event_id,
    }
}

#[tokio::test]
async fn secret_never_reaches_derived_persistence() {
    let fx = fixture(FakeAgentRunner::new()).await;
    let summary = fx.orchestrator.run_case(fx.case_id, "test-model").await.unwrap();
    assert_eq!(summary.status, CourtRunStatus::Completed);

    let dumped = fx.store.dump_all_persisted_json();
    assert!(!dumped.is_empty());
    for row in &dumped {
        assert!(!row.contains(SECRET), "raw secret persisted: {row}");
    }
    assert!(
        dumped.iter().any(|row| row.contains("***REDACTED:secret***")),
        "expected the redaction placeholder somewhere in persisted rows"
    );

    let lessons = fx.store.lessons_for_case(fx.case_id);
    assert_eq!(lessons.len(), 1);
    assert!(lessons[0].lesson.content.contains("***REDACTED:secret***"));
    assert!(lessons[0].embedding_model.is_some());
}

#[tokio::test]
async fn partial_failure_isolates_the_broken_stage() {
    let fx = fixture(FakeAgentRunner::failing(&[Stage::Defense])).await;
    let summary = fx.orchestrator.run_case(fx.case_id, "test-model").await.unwrap();
    assert_eq!(summary.status, CourtRunStatus::CompletedWithErrors);

    let events = fx.store.list_case_events(fx.case_id).await.unwrap();
    let defense_errors: Vec<_> = events
        .iter()
        .filter(|event| {
            event.event_type == EventType::Error && event.stage.as_deref() == Some("defense")
        })
        .collect();
    assert_eq!(defense_errors.len(), 1);

    for stage in ["prosecutor", "jury", "judge"] {
        assert!(
            events.iter().any(|event| {
                event.event_type == EventType::ModelResult && event.stage.as_deref() == Some(stage)
            }),
            "expected a model_result event for {stage}"
        );
    }

    // Judge output persisted despite the failed sibling.
    assert_eq!(fx.store.judgement_count(), 1);
    let updates = fx.store.prompt_updates_for_case(fx.case_id);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, PromptUpdateStatus::Proposed);
}

#[tokio::test]
async fn forged_evidence_ids_are_filtered_before_persistence() {
    let fx = fixture(FakeAgentRunner::new()).await;
    fx.orchestrator.run_case(fx.case_id, "test-model").await.unwrap();

    let updates = fx.store.prompt_updates_for_case(fx.case_id);
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].evidence_event_ids,
        vec![fx.seed_event_id.to_string()]
    );
}

#[tokio::test]
async fn run_finalizes_exactly_once_with_ended_at() {
    let fx = fixture(FakeAgentRunner::new()).await;
    let summary = fx.orchestrator.run_case(fx.case_id, "test-model").await.unwrap();

    let run = fx.store.get_court_run(summary.court_run_id).await.unwrap();
    assert!(run.ended_at.is_some());
    assert_eq!(run.status, CourtRunStatus::Completed);
    let artifacts = run.artifacts.expect("artifacts persisted");
    assert!(artifacts.get("context").is_some());
    assert!(artifacts.pointer("/stages/judge").is_some());
}

#[tokio::test]
async fn events_are_ordered_and_journal_the_whole_run() {
    let fx = fixture(FakeAgentRunner::new()).await;
    fx.orchestrator.run_case(fx.case_id, "test-model").await.unwrap();

    let events = fx.store.list_case_events(fx.case_id).await.unwrap();
    let seqs: Vec<i64> = events.iter().filter_map(|event| event.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);

    // Per stage: model_call + model_result + artifact; plus seed feedback and
    // the final artifact event.
    let calls = events
        .iter()
        .filter(|e| e.event_type == EventType::ModelCall)
        .count();
    assert_eq!(calls, 4);
    let artifacts = events
        .iter()
        .filter(|e| e.event_type == EventType::Artifact)
        .count();
    assert_eq!(artifacts, 5);
}

#[tokio::test]
async fn cancelled_run_finalizes_as_failed() {
    let fx = fixture(FakeAgentRunner::hanging()).await;
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = tx.send(true);
    });
    let summary = fx
        .orchestrator
        .run_case_with_cancel(fx.case_id, "test-model", rx)
        .await
        .unwrap();
    assert_eq!(summary.status, CourtRunStatus::Failed);

    let run = fx.store.get_court_run(summary.court_run_id).await.unwrap();
    assert_eq!(run.status, CourtRunStatus::Failed);
    assert!(run.ended_at.is_some());

    let events = fx.store.list_case_events(fx.case_id).await.unwrap();
    assert!(events
        .iter()
        .any(|event| event.event_type == EventType::Error
            && event.content.contains("cancelled")));
}
