//! Issue triage: classify, prioritize, and pick a first action.

use serde_json::json;

use crate::agents::types::{Issue, IssueAnalysisOutput, IssueType, Priority, ResponseStrategy};
use crate::error::{PrismError, PrismResult};
use crate::llm::{JsonSchemaSpec, LlmClient, LlmTask};

/// Deterministic triage. An empty body always means `needs_more_info` and a
/// `request_info` action.
pub fn analyze_issue(issue: &Issue) -> IssueAnalysisOutput {
    let title_lower = issue.title.to_lowercase();
    let labels_lower: Vec<String> = issue.labels.iter().map(|l| l.to_lowercase()).collect();
    let has_label = |name: &str| labels_lower.iter().any(|l| l == name);

    let issue_type = if has_label("bug")
        || has_label("crash")
        || has_label("regression")
        || ["fail", "error", "exception", "stack trace", "crash"]
            .iter()
            .any(|token| title_lower.contains(token))
    {
        IssueType::Bug
    } else if has_label("documentation") || title_lower.contains("docs") || title_lower.contains("readme")
    {
        IssueType::Documentation
    } else if has_label("feature")
        || ["feature", "support", "add "].iter().any(|token| title_lower.contains(token))
    {
        IssueType::Feature
    } else if issue.title.contains('?') || has_label("question") || title_lower.contains("how do i")
    {
        IssueType::Question
    } else {
        IssueType::Other
    };

    let combined = format!("{}\n\n{}", issue.title, issue.body).to_lowercase();
    let keywords = extract_keywords(&combined);
    let required_skills = infer_required_skills(issue_type, &keywords);

    let needs_more_info = issue.body.trim().is_empty();
    let suggested_action = if needs_more_info {
        ResponseStrategy::RequestInfo
    } else {
        ResponseStrategy::DirectAnswer
    };

    let summary = if issue.title.trim().is_empty() {
        format!("Issue #{}", issue.number)
    } else {
        issue.title.trim().to_string()
    };

    IssueAnalysisOutput {
        issue_type,
        priority: infer_priority(issue_type, &combined),
        required_skills,
        keywords,
        summary,
        needs_more_info,
        suggested_action,
    }
}

pub fn analysis_schema() -> JsonSchemaSpec {
    JsonSchemaSpec::new(
        "issue_analysis_output",
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "issue_type": {"type": "string", "enum": ["bug", "feature", "question", "documentation", "other"]},
                "priority": {"type": "string", "enum": ["critical", "high", "medium", "low"]},
                "required_skills": {"type": "array", "items": {"type": "string"}},
                "keywords": {"type": "array", "items": {"type": "string"}},
                "summary": {"type": "string"},
                "needs_more_info": {"type": "boolean"},
                "suggested_action": {"type": "string", "enum": ["direct_answer", "request_info", "link_docs", "escalate"]}
            },
            "required": [
                "issue_type", "priority", "required_skills", "keywords",
                "summary", "needs_more_info", "suggested_action"
            ]
        }),
    )
}

pub async fn analyze_issue_llm(llm: &LlmClient, issue: &Issue) -> PrismResult<IssueAnalysisOutput> {
    let system = "You are a DevRel agent that triages GitHub issues.\n\
                  Return only the requested JSON schema.\n\
                  If information is missing, set needs_more_info=true and suggested_action=request_info.";
    let user = format!(
        "Issue number: {}\nTitle: {}\nBody: {}\nLabels: {:?}\n",
        issue.number, issue.title, issue.body, issue.labels
    );
    let result = llm
        .generate_json(LlmTask::IssueTriage, system, &user, &analysis_schema(), 600)
        .await?;
    serde_json::from_value(result.data).map_err(|e| PrismError::Validation {
        stage: "issue_triage".to_string(),
        message: e.to_string(),
    })
}

fn infer_priority(issue_type: IssueType, text: &str) -> Priority {
    if ["critical", "security", "data loss", "breach"]
        .iter()
        .any(|token| text.contains(token))
    {
        return Priority::Critical;
    }
    if ["crash", "regression", "downtime", "outage"]
        .iter()
        .any(|token| text.contains(token))
    {
        return Priority::High;
    }
    if matches!(issue_type, IssueType::Bug | IssueType::Documentation) {
        return Priority::Medium;
    }
    Priority::Low
}

fn extract_keywords(text: &str) -> Vec<String> {
    let mut hits = Vec::new();
    for token in ["oauth", "auth", "redis", "cache", "logging", "debug", "api", "timeout"] {
        if text.contains(token) && !hits.iter().any(|t: &String| t == token) {
            hits.push(token.to_string());
        }
    }
    hits
}

fn infer_required_skills(issue_type: IssueType, keywords: &[String]) -> Vec<String> {
    let mut skills = Vec::new();
    if issue_type == IssueType::Documentation {
        skills.push("docs".to_string());
    }
    if issue_type == IssueType::Bug {
        skills.push("debugging".to_string());
    }
    let has = |kw: &str| keywords.iter().any(|k| k == kw);
    if has("oauth") || has("auth") {
        skills.push("auth".to_string());
    }
    if has("redis") || has("cache") {
        skills.push("cache".to_string());
    }
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(title: &str, body: &str, labels: &[&str]) -> Issue {
        Issue {
            number: 42,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn empty_body_requests_more_info() {
        let analysis = analyze_issue(&issue("Crash on startup", "", &[]));
        assert!(analysis.needs_more_info);
        assert_eq!(analysis.suggested_action, ResponseStrategy::RequestInfo);
    }

    #[test]
    fn bug_labels_and_tokens_classify_as_bug() {
        let by_label = analyze_issue(&issue("Weird behavior", "details", &["bug"]));
        assert_eq!(by_label.issue_type, IssueType::Bug);
        let by_title = analyze_issue(&issue("error when connecting", "details", &[]));
        assert_eq!(by_title.issue_type, IssueType::Bug);
    }

    #[test]
    fn security_text_is_critical() {
        let analysis = analyze_issue(&issue("Potential security breach", "token leak", &[]));
        assert_eq!(analysis.priority, Priority::Critical);
    }

    #[test]
    fn keywords_and_skills_line_up() {
        let analysis = analyze_issue(&issue(
            "Redis cache timeout",
            "our redis cache hits a timeout under load",
            &["bug"],
        ));
        assert!(analysis.keywords.contains(&"redis".to_string()));
        assert!(analysis.keywords.contains(&"timeout".to_string()));
        assert!(analysis.required_skills.contains(&"cache".to_string()));
        assert!(analysis.required_skills.contains(&"debugging".to_string()));
    }

    #[test]
    fn question_mark_classifies_as_question() {
        let analysis = analyze_issue(&issue("How do I enable tracing?", "context", &[]));
        assert_eq!(analysis.issue_type, IssueType::Question);
    }
}
