//! Response drafting, optionally grounded in retrieved KB references.

use serde_json::json;

use crate::agents::types::{Issue, IssueAnalysisOutput, ResponseOutput, ResponseStrategy};
use crate::error::{PrismError, PrismResult};
use crate::llm::{JsonSchemaSpec, LlmClient, LlmTask};

/// Deterministic draft used when no LLM is configured.
pub fn draft_response(_issue: &Issue, analysis: &IssueAnalysisOutput) -> ResponseOutput {
    if analysis.needs_more_info {
        let body = "Thanks for the report — to help us reproduce and confirm the fix, could you provide:\n\
                    - Steps to reproduce\n\
                    - Expected vs actual behavior\n\
                    - Environment/version\n\
                    - Relevant logs/stack traces\n";
        return ResponseOutput {
            strategy: ResponseStrategy::RequestInfo,
            response_text: body.to_string(),
            confidence: 0.6,
            references: vec![],
            follow_up_needed: true,
        };
    }

    let body = "Thanks for reaching out. Here are a few next steps to unblock:\n\
                - Confirm your environment/version\n\
                - Share logs or errors\n\
                - Provide a minimal reproduction if possible\n";
    ResponseOutput {
        strategy: analysis.suggested_action,
        response_text: body.to_string(),
        confidence: 0.5,
        references: vec![],
        follow_up_needed: false,
    }
}

pub fn response_schema() -> JsonSchemaSpec {
    JsonSchemaSpec::new(
        "response_output",
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "strategy": {"type": "string", "enum": ["direct_answer", "request_info", "link_docs", "escalate"]},
                "response_text": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "references": {"type": "array", "items": {"type": "string"}},
                "follow_up_needed": {"type": "boolean"}
            },
            "required": ["strategy", "response_text", "confidence", "references", "follow_up_needed"]
        }),
    )
}

pub async fn draft_response_llm(
    llm: &LlmClient,
    issue: &Issue,
    analysis: &IssueAnalysisOutput,
    references: &[String],
) -> PrismResult<ResponseOutput> {
    let system = "You are a DevRel agent responding on GitHub issues.\n\
                  Be accurate, concise, and avoid hallucinating versions/links.\n\
                  If needs_more_info=true, ask for concrete reproduction/environment/logs.\n\
                  Keep response_text short (<= 180 words).";
    let payload = json!({
        "issue": issue,
        "analysis": analysis,
        "references": references,
    });
    let user = format!("Input:\n{payload}");
    let result = llm
        .generate_json(LlmTask::Response, system, &user, &response_schema(), 1200)
        .await?;
    serde_json::from_value(result.data).map_err(|e| PrismError::Validation {
        stage: "response".to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::triage::analyze_issue;

    #[test]
    fn missing_info_asks_for_reproduction() {
        let issue = Issue {
            number: 7,
            title: "Broken".to_string(),
            body: String::new(),
            labels: vec![],
        };
        let out = draft_response(&issue, &analyze_issue(&issue));
        assert_eq!(out.strategy, ResponseStrategy::RequestInfo);
        assert!(out.follow_up_needed);
        assert!(out.response_text.contains("Steps to reproduce"));
    }

    #[test]
    fn complete_issue_gets_direct_next_steps() {
        let issue = Issue {
            number: 8,
            title: "Timeout under load".to_string(),
            body: "full reproduction attached".to_string(),
            labels: vec![],
        };
        let out = draft_response(&issue, &analyze_issue(&issue));
        assert_eq!(out.strategy, ResponseStrategy::DirectAnswer);
        assert!(!out.follow_up_needed);
    }
}
