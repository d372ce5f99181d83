//! Shared agent input/output types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: i64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Bug,
    Feature,
    Question,
    Documentation,
    Other,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::Feature => "feature",
            IssueType::Question => "question",
            IssueType::Documentation => "documentation",
            IssueType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    DirectAnswer,
    RequestInfo,
    LinkDocs,
    Escalate,
}

impl ResponseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStrategy::DirectAnswer => "direct_answer",
            ResponseStrategy::RequestInfo => "request_info",
            ResponseStrategy::LinkDocs => "link_docs",
            ResponseStrategy::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueAnalysisOutput {
    pub issue_type: IssueType,
    pub priority: Priority,
    pub required_skills: Vec<String>,
    pub keywords: Vec<String>,
    pub summary: String,
    pub needs_more_info: bool,
    pub suggested_action: ResponseStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub recent_activity_score: f64,
    #[serde(default)]
    pub merged_prs: i64,
    #[serde(default)]
    pub reviews: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReason {
    pub factor: String,
    pub explanation: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentOutput {
    pub recommended_assignee: String,
    pub confidence: f64,
    pub reasons: Vec<AssignmentReason>,
    pub context_for_assignee: String,
    pub alternative_assignees: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseOutput {
    pub strategy: ResponseStrategy,
    pub response_text: String,
    pub confidence: f64,
    pub references: Vec<String>,
    pub follow_up_needed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocGapOutput {
    pub has_gap: bool,
    pub gap_topic: String,
    pub affected_issues: Vec<i64>,
    pub suggested_doc_path: String,
    pub suggested_outline: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionEvidence {
    pub criterion: String,
    pub status: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionOutput {
    pub is_candidate: bool,
    pub current_stage: String,
    pub suggested_stage: String,
    pub confidence: f64,
    pub evidence: Vec<PromotionEvidence>,
    pub recommendation: String,
}
