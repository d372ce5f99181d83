//! Typed court domain model.
//!
//! Stage outputs are tagged variants parsed at the agent boundary; inside the
//! orchestrator only typed values flow. Actor types, statuses, and polarities
//! are closed enums rather than free strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PrismError, PrismResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Human,
    Ai,
    Tool,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Human => "human",
            ActorType::Ai => "ai",
            ActorType::Tool => "tool",
            ActorType::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ModelCall,
    ModelResult,
    Artifact,
    Error,
    Feedback,
    Note,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ModelCall => "model_call",
            EventType::ModelResult => "model_result",
            EventType::Artifact => "artifact",
            EventType::Error => "error",
            EventType::Feedback => "feedback",
            EventType::Note => "note",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prosecutor,
    Defense,
    Jury,
    Judge,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prosecutor => "prosecutor",
            Stage::Defense => "defense",
            Stage::Jury => "jury",
            Stage::Judge => "judge",
        }
    }

    pub const FANOUT: [Stage; 3] = [Stage::Prosecutor, Stage::Defense, Stage::Jury];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourtRunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl CourtRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourtRunStatus::Running => "running",
            CourtRunStatus::Completed => "completed",
            CourtRunStatus::CompletedWithErrors => "completed_with_errors",
            CourtRunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Do,
    Dont,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Do => "do",
            Polarity::Dont => "dont",
        }
    }
}

/// A single agent decision under review. Created once; appended to via
/// events only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: Uuid,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub feedback: Value,
    pub redaction_policy_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only journal entry. Ordering within a case is `(ts, seq)`; `seq`
/// is assigned by the store at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEvent {
    pub id: Uuid,
    pub case_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub court_run_id: Option<Uuid>,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    pub actor_type: ActorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub event_type: EventType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl CaseEvent {
    pub fn new(case_id: Uuid, actor_type: ActorType, event_type: EventType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            court_run_id: None,
            ts: Utc::now(),
            seq: None,
            actor_type,
            actor_id: None,
            role: None,
            stage: None,
            event_type,
            content: content.into(),
            meta: None,
            usage: None,
        }
    }
}

/// One pass of the four-stage court over a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtRun {
    pub id: Uuid,
    pub case_id: Uuid,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CourtRunStatus,
    pub artifacts: Option<Value>,
}

/// A reusable do/don't rule extracted by the judge, role-scoped and
/// evidence-linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub role: String,
    pub polarity: Polarity,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_lesson_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredLesson {
    pub lesson: Lesson,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptUpdateProposal {
    pub role: String,
    pub proposal: String,
    pub reason: String,
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProsecutorOutput {
    #[serde(default)]
    pub criticisms: Vec<String>,
    #[serde(default)]
    pub candidate_lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseOutput {
    #[serde(default)]
    pub praises: Vec<String>,
    #[serde(default)]
    pub candidate_lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JuryOutput {
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub missing_info: Vec<String>,
    #[serde(default)]
    pub candidate_lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeOutput {
    #[serde(default)]
    pub selected_lessons: Vec<Lesson>,
    #[serde(default)]
    pub deferred_lessons: Vec<DeferredLesson>,
    #[serde(default)]
    pub prompt_update_proposals: Vec<PromptUpdateProposal>,
    #[serde(default)]
    pub user_improvement_suggestions: Vec<ImprovementSuggestion>,
    #[serde(default)]
    pub system_improvement_suggestions: Vec<ImprovementSuggestion>,
}

/// The single polymorphic stage-output sum type used on the storage path.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Prosecutor(ProsecutorOutput),
    Defense(DefenseOutput),
    Jury(JuryOutput),
    Judge(JudgeOutput),
}

impl StageOutput {
    /// Parse and validate a raw agent output for the given stage.
    pub fn parse(stage: Stage, output: Value) -> PrismResult<Self> {
        let map_err = |e: serde_json::Error| PrismError::Validation {
            stage: stage.as_str().to_string(),
            message: e.to_string(),
        };
        Ok(match stage {
            Stage::Prosecutor => StageOutput::Prosecutor(serde_json::from_value(output).map_err(map_err)?),
            Stage::Defense => StageOutput::Defense(serde_json::from_value(output).map_err(map_err)?),
            Stage::Jury => StageOutput::Jury(serde_json::from_value(output).map_err(map_err)?),
            Stage::Judge => StageOutput::Judge(serde_json::from_value(output).map_err(map_err)?),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            StageOutput::Prosecutor(o) => serde_json::to_value(o).unwrap_or(Value::Null),
            StageOutput::Defense(o) => serde_json::to_value(o).unwrap_or(Value::Null),
            StageOutput::Jury(o) => serde_json::to_value(o).unwrap_or(Value::Null),
            StageOutput::Judge(o) => serde_json::to_value(o).unwrap_or(Value::Null),
        }
    }

    pub fn as_judge(&self) -> Option<&JudgeOutput> {
        match self {
            StageOutput::Judge(o) => Some(o),
            _ => None,
        }
    }
}

/// Compact canonical JSON (serde_json keeps object keys sorted).
pub fn json_compact(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_output_parses_judge_shape() {
        let raw = json!({
            "selected_lessons": [{
                "role": "response",
                "polarity": "dont",
                "title": "No secrets in drafts",
                "content": "Never echo credentials back to the user.",
                "rationale": "Leaks compound.",
                "confidence": 0.9,
                "tags": ["security"],
                "evidence_event_ids": ["evt-1"]
            }],
            "deferred_lessons": [],
            "prompt_update_proposals": [{
                "role": "response",
                "proposal": "SYSTEM: refuse to echo credentials.",
                "reason": "Observed leak pattern.",
                "evidence_event_ids": ["evt-1"]
            }]
        });
        let parsed = StageOutput::parse(Stage::Judge, raw).unwrap();
        let judge = parsed.as_judge().unwrap();
        assert_eq!(judge.selected_lessons.len(), 1);
        assert_eq!(judge.selected_lessons[0].polarity, Polarity::Dont);
        assert_eq!(judge.prompt_update_proposals.len(), 1);
    }

    #[test]
    fn invalid_polarity_is_a_validation_error() {
        let raw = json!({
            "selected_lessons": [{
                "role": "response",
                "polarity": "maybe",
                "title": "t",
                "content": "c"
            }]
        });
        let err = StageOutput::parse(Stage::Judge, raw).unwrap_err();
        assert!(matches!(err, PrismError::Validation { ref stage, .. } if stage == "judge"));
    }

    #[test]
    fn enums_serialize_to_wire_names() {
        assert_eq!(serde_json::to_value(ActorType::Ai).unwrap(), json!("ai"));
        assert_eq!(
            serde_json::to_value(CourtRunStatus::CompletedWithErrors).unwrap(),
            json!("completed_with_errors")
        );
        assert_eq!(serde_json::to_value(EventType::ModelCall).unwrap(), json!("model_call"));
        assert_eq!(serde_json::to_value(Polarity::Dont).unwrap(), json!("dont"));
    }
}
