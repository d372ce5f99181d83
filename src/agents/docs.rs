//! Documentation-gap detection over a set of issues.

use std::collections::BTreeMap;

use serde_json::json;

use crate::agents::types::{DocGapOutput, Issue, Priority};
use crate::error::{PrismError, PrismResult};
use crate::llm::{JsonSchemaSpec, LlmClient, LlmTask};

#[derive(Debug, Clone)]
pub struct DocGapCandidate {
    pub topic: String,
    pub evidence_issue_numbers: Vec<i64>,
    pub rationale: String,
}

/// Keyword clustering over issue titles/bodies/labels.
pub fn detect_doc_gaps(issues: &[Issue]) -> Vec<DocGapCandidate> {
    let mut candidates: BTreeMap<&'static str, Vec<i64>> = BTreeMap::new();
    for issue in issues {
        let title_lower = issue.title.to_lowercase();
        let body_lower = issue.body.to_lowercase();
        let labels_lower: Vec<String> = issue.labels.iter().map(|l| l.to_lowercase()).collect();

        let key = if title_lower.contains("redis") || body_lower.contains("redis") {
            "redis"
        } else if title_lower.contains("logging")
            || title_lower.contains("debug")
            || body_lower.contains("logging")
        {
            "logging"
        } else if labels_lower.iter().any(|l| l == "documentation") || title_lower.contains("docs")
        {
            "documentation"
        } else {
            continue;
        };
        candidates.entry(key).or_default().push(issue.number);
    }

    candidates
        .into_iter()
        .map(|(topic, mut numbers)| {
            numbers.sort_unstable();
            numbers.dedup();
            DocGapCandidate {
                topic: topic.to_string(),
                evidence_issue_numbers: numbers,
                rationale: "Multiple issues suggest a recurring documentation gap.".to_string(),
            }
        })
        .collect()
}

pub fn to_doc_gap_output(candidate: &DocGapCandidate) -> DocGapOutput {
    let (doc_path, outline, priority): (&str, &[&str], Priority) = match candidate.topic.as_str() {
        "redis" => (
            "docs/cache/redis.md",
            &["Overview", "Installation", "Configuration", "Common errors", "Example config"],
            Priority::High,
        ),
        "logging" => (
            "docs/debugging/logging.md",
            &["Enable debug logging", "Log locations", "Common troubleshooting"],
            Priority::Medium,
        ),
        _ => (
            "docs/README.md",
            &["Problem statement", "How to", "FAQ"],
            Priority::Medium,
        ),
    };

    DocGapOutput {
        has_gap: true,
        gap_topic: candidate.topic.clone(),
        affected_issues: candidate.evidence_issue_numbers.clone(),
        suggested_doc_path: doc_path.to_string(),
        suggested_outline: outline.iter().map(|s| s.to_string()).collect(),
        priority,
    }
}

pub fn doc_gap_schema() -> JsonSchemaSpec {
    JsonSchemaSpec::new(
        "doc_gap_output",
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "has_gap": {"type": "boolean"},
                "gap_topic": {"type": "string"},
                "affected_issues": {"type": "array", "items": {"type": "integer"}},
                "suggested_doc_path": {"type": "string"},
                "suggested_outline": {"type": "array", "items": {"type": "string"}},
                "priority": {"type": "string", "enum": ["critical", "high", "medium", "low"]}
            },
            "required": [
                "has_gap", "gap_topic", "affected_issues",
                "suggested_doc_path", "suggested_outline", "priority"
            ]
        }),
    )
}

pub async fn detect_doc_gaps_llm(llm: &LlmClient, issues: &[Issue]) -> PrismResult<DocGapOutput> {
    let system = "You are a DevRel agent that detects documentation gaps from GitHub issues.\n\
                  Return only JSON. Do not hallucinate issue numbers not provided.";
    let user = format!("Issues:\n{}", json!(issues));
    let result = llm
        .generate_json(LlmTask::Docs, system, &user, &doc_gap_schema(), 800)
        .await?;
    serde_json::from_value(result.data).map_err(|e| PrismError::Validation {
        stage: "docs".to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: i64, title: &str, body: &str) -> Issue {
        Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: vec![],
        }
    }

    #[test]
    fn clusters_issues_by_topic() {
        let issues = vec![
            issue(1, "Redis connection refused", ""),
            issue(2, "redis auth fails", ""),
            issue(3, "How to enable logging", ""),
            issue(4, "unrelated widget question", ""),
        ];
        let candidates = detect_doc_gaps(&issues);
        assert_eq!(candidates.len(), 2);
        let redis = candidates.iter().find(|c| c.topic == "redis").unwrap();
        assert_eq!(redis.evidence_issue_numbers, vec![1, 2]);
    }

    #[test]
    fn redis_gap_maps_to_cache_doc_path() {
        let candidate = DocGapCandidate {
            topic: "redis".to_string(),
            evidence_issue_numbers: vec![1, 2],
            rationale: "r".to_string(),
        };
        let out = to_doc_gap_output(&candidate);
        assert!(out.has_gap);
        assert_eq!(out.suggested_doc_path, "docs/cache/redis.md");
        assert_eq!(out.priority, Priority::High);
    }
}
