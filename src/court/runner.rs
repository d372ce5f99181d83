//! The agent-runner contract and its two implementations.
//!
//! A runner produces `{output, usage?, meta?}` for a stage; the output must
//! validate against the stage's JSON Schema before anything downstream sees
//! it. Runners may fail — the orchestrator treats a failed stage as a value,
//! not a control-flow event.

use serde_json::{json, Value};

use crate::court::models::Stage;
use crate::court::tools::CourtTools;
use crate::error::{PrismError, PrismResult};
use crate::llm::{JsonSchemaSpec, LlmClient, LlmTask};
use crate::prompts::PromptRegistry;

/// What an agent hands back for one stage.
#[derive(Debug, Clone)]
pub struct StageRunResult {
    pub output: Value,
    pub usage: Option<Value>,
    pub meta: Option<Value>,
}

#[async_trait::async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        stage: Stage,
        input: &Value,
        tools: &CourtTools,
    ) -> PrismResult<StageRunResult>;
}

fn lesson_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "role": {"type": "string"},
            "polarity": {"type": "string", "enum": ["do", "dont"]},
            "title": {"type": "string"},
            "content": {"type": "string"},
            "rationale": {"type": ["string", "null"]},
            "confidence": {"type": ["number", "null"], "minimum": 0, "maximum": 1},
            "tags": {"type": "array", "items": {"type": "string"}},
            "evidence_event_ids": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["role", "polarity", "title", "content"]
    })
}

/// The stage-specific output schema the runner contract is validated against.
pub fn stage_schema(stage: Stage) -> JsonSchemaSpec {
    let schema = match stage {
        Stage::Prosecutor => json!({
            "type": "object",
            "properties": {
                "criticisms": {"type": "array", "items": {"type": "string"}},
                "candidate_lessons": {"type": "array", "items": lesson_schema()}
            },
            "required": ["criticisms", "candidate_lessons"]
        }),
        Stage::Defense => json!({
            "type": "object",
            "properties": {
                "praises": {"type": "array", "items": {"type": "string"}},
                "candidate_lessons": {"type": "array", "items": lesson_schema()}
            },
            "required": ["praises", "candidate_lessons"]
        }),
        Stage::Jury => json!({
            "type": "object",
            "properties": {
                "observations": {"type": "array", "items": {"type": "string"}},
                "risks": {"type": "array", "items": {"type": "string"}},
                "missing_info": {"type": "array", "items": {"type": "string"}},
                "candidate_lessons": {"type": "array", "items": lesson_schema()}
            },
            "required": ["observations", "risks", "missing_info", "candidate_lessons"]
        }),
        Stage::Judge => json!({
            "type": "object",
            "properties": {
                "selected_lessons": {"type": "array", "items": lesson_schema()},
                "deferred_lessons": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "lesson": lesson_schema(),
                            "reason": {"type": "string"}
                        },
                        "required": ["lesson", "reason"]
                    }
                },
                "prompt_update_proposals": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": {"type": "string"},
                            "proposal": {"type": "string"},
                            "reason": {"type": "string"},
                            "agent_id": {"type": ["string", "null"]},
                            "from_version": {"type": ["string", "null"]},
                            "evidence_event_ids": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["role", "proposal", "reason"]
                    }
                },
                "user_improvement_suggestions": {"type": "array"},
                "system_improvement_suggestions": {"type": "array"}
            },
            "required": ["selected_lessons", "deferred_lessons", "prompt_update_proposals"]
        }),
    };
    JsonSchemaSpec::new(format!("{stage}_output"), schema)
}

/// Validate a raw stage output against the contract schema.
pub fn validate_stage_output(stage: Stage, output: &Value) -> PrismResult<()> {
    let spec = stage_schema(stage);
    let validator = jsonschema::validator_for(&spec.schema)
        .map_err(|e| PrismError::Configuration(format!("invalid stage schema: {e}")))?;
    if let Err(err) = validator.validate(output) {
        return Err(PrismError::Validation {
            stage: stage.as_str().to_string(),
            message: err.to_string(),
        });
    }
    Ok(())
}

// ── Deterministic runner ────────────────────────────────────────────────

/// Heuristic runner used when no LLM credential is configured. Output shape
/// matches the contract exactly; content is derived from the case context.
pub struct HeuristicAgentRunner;

#[async_trait::async_trait]
impl AgentRunner for HeuristicAgentRunner {
    async fn run(
        &self,
        stage: Stage,
        input: &Value,
        _tools: &CourtTools,
    ) -> PrismResult<StageRunResult> {
        let feedback_verdict = input
            .pointer("/case/feedback/verdict")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let event_count = input
            .get("events")
            .and_then(Value::as_array)
            .map(|events| events.len())
            .unwrap_or(0);

        let output = match stage {
            Stage::Prosecutor => json!({
                "criticisms": [format!(
                    "Human feedback recorded verdict '{feedback_verdict}'; the output was not cross-checked against it."
                )],
                "candidate_lessons": [],
            }),
            Stage::Defense => json!({
                "praises": [format!("The case preserved {event_count} journal event(s) for review.")],
                "candidate_lessons": [],
            }),
            Stage::Jury => {
                let risks: Vec<String> = if feedback_verdict == "rejected" {
                    vec!["Human reviewer rejected the output.".to_string()]
                } else {
                    vec![]
                };
                let missing_info: Vec<String> = if event_count == 0 {
                    vec!["No case events were journaled before review.".to_string()]
                } else {
                    vec![]
                };
                json!({
                    "observations": [format!("{event_count} event(s) available as evidence.")],
                    "risks": risks,
                    "missing_info": missing_info,
                    "candidate_lessons": [],
                })
            }
            Stage::Judge => {
                // Promote candidate lessons surfaced by the debate stages.
                let mut selected = Vec::new();
                if let Some(stage_outputs) =
                    input.get("stage_outputs").and_then(Value::as_object)
                {
                    for output in stage_outputs.values() {
                        if let Some(lessons) =
                            output.get("candidate_lessons").and_then(Value::as_array)
                        {
                            selected.extend(lessons.iter().cloned());
                        }
                    }
                }
                json!({
                    "selected_lessons": selected,
                    "deferred_lessons": [],
                    "prompt_update_proposals": [],
                    "user_improvement_suggestions": [],
                    "system_improvement_suggestions": [],
                })
            }
        };

        Ok(StageRunResult {
            output,
            usage: None,
            meta: Some(json!({"runner": "heuristic"})),
        })
    }
}

// ── LLM runner ──────────────────────────────────────────────────────────

fn default_stage_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::Prosecutor => {
            "You are the prosecutor in a retrospective court over an AI agent's decision.\n\
             Identify concrete failures and risky patterns in the agent's output given the case and events.\n\
             Propose candidate lessons (role-scoped do/dont rules) with evidence_event_ids taken from the input events."
        }
        Stage::Defense => {
            "You are the defense in a retrospective court over an AI agent's decision.\n\
             Identify what the agent did well and which criticisms would be unfair.\n\
             Propose candidate lessons worth keeping, with evidence_event_ids taken from the input events."
        }
        Stage::Jury => {
            "You are the jury in a retrospective court over an AI agent's decision.\n\
             Weigh the case neutrally: observations, risks, and missing information.\n\
             Propose candidate lessons only when the evidence is strong."
        }
        Stage::Judge => {
            "You are the judge in a retrospective court over an AI agent's decision.\n\
             You receive the case, its events, and the prosecutor/defense/jury outputs (some may be null).\n\
             Select only well-evidenced lessons, defer weak ones with a reason, and propose prompt updates\n\
             for the agent's role where a systematic fix is warranted. Reference evidence_event_ids from the input."
        }
    }
}

/// LLM-backed runner. The system prompt for a stage is the active role
/// prompt from the registry when one exists, else the built-in default.
pub struct LlmAgentRunner {
    llm: LlmClient,
    prompts: PromptRegistry,
}

impl LlmAgentRunner {
    pub fn new(llm: LlmClient, prompts: PromptRegistry) -> Self {
        Self { llm, prompts }
    }
}

#[async_trait::async_trait]
impl AgentRunner for LlmAgentRunner {
    async fn run(
        &self,
        stage: Stage,
        input: &Value,
        _tools: &CourtTools,
    ) -> PrismResult<StageRunResult> {
        let system = match self.prompts.active_prompt(stage.as_str()).await? {
            Some(active) => active.prompt,
            None => default_stage_prompt(stage).to_string(),
        };
        let user = format!("Case input:\n{input}");
        let result = self
            .llm
            .generate_json(LlmTask::Judge, &system, &user, &stage_schema(stage), 1600)
            .await?;
        Ok(StageRunResult {
            output: result.data,
            usage: result.usage,
            meta: Some(json!({"runner": "llm", "stage": stage.as_str()})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_outputs_validate_against_stage_schemas() {
        let input = json!({
            "case": {"feedback": {"verdict": "rejected"}},
            "events": [{"id": "evt-1"}],
            "stage_outputs": {
                "prosecutor": {
                    "criticisms": [],
                    "candidate_lessons": [{
                        "role": "response",
                        "polarity": "dont",
                        "title": "t",
                        "content": "c"
                    }]
                }
            }
        });
        let runner = HeuristicAgentRunner;
        for stage in [Stage::Prosecutor, Stage::Defense, Stage::Jury, Stage::Judge] {
            let result = futures::executor::block_on(async {
                let tools_input = input.clone();
                // Tools are unused by the heuristic runner; build a minimal one.
                let redactor = std::sync::Arc::new(
                    crate::redaction::Redactor::new(crate::redaction::RedactionPolicy::builtin())
                        .unwrap(),
                );
                let store = std::sync::Arc::new(crate::storage::MemoryCourtStore::new(
                    redactor.clone(),
                ));
                let lessons = std::sync::Arc::new(crate::lessons::LessonService::new(
                    store.clone(),
                    std::sync::Arc::new(crate::embeddings::HashEmbedder::new(16)),
                    redactor.clone(),
                ));
                let tools = CourtTools::new(store, redactor, lessons, uuid::Uuid::new_v4());
                runner.run(stage, &tools_input, &tools).await.unwrap()
            });
            validate_stage_output(stage, &result.output).unwrap();
        }
    }

    #[test]
    fn judge_promotes_candidate_lessons() {
        let input = json!({
            "case": {},
            "events": [],
            "stage_outputs": {
                "prosecutor": {
                    "criticisms": [],
                    "candidate_lessons": [{
                        "role": "response", "polarity": "dont", "title": "t", "content": "c"
                    }]
                },
                "defense": null
            }
        });
        let output = futures::executor::block_on(async {
            let redactor = std::sync::Arc::new(
                crate::redaction::Redactor::new(crate::redaction::RedactionPolicy::builtin())
                    .unwrap(),
            );
            let store =
                std::sync::Arc::new(crate::storage::MemoryCourtStore::new(redactor.clone()));
            let lessons = std::sync::Arc::new(crate::lessons::LessonService::new(
                store.clone(),
                std::sync::Arc::new(crate::embeddings::HashEmbedder::new(16)),
                redactor.clone(),
            ));
            let tools = CourtTools::new(store, redactor, lessons, uuid::Uuid::new_v4());
            HeuristicAgentRunner
                .run(Stage::Judge, &input, &tools)
                .await
                .unwrap()
                .output
        });
        assert_eq!(output["selected_lessons"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn schema_rejects_malformed_stage_output() {
        let bad = json!({"criticisms": "not-an-array", "candidate_lessons": []});
        let err = validate_stage_output(Stage::Prosecutor, &bad).unwrap_err();
        assert!(matches!(err, PrismError::Validation { .. }));
    }
}
