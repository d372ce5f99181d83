//! Assignment: rank contributors for an analyzed issue.
//!
//! Contributor scoring is pluggable through `ScoreWeights`; the defaults are
//! tuned for small repos and can be swapped wholesale by callers.

use serde_json::json;

use crate::agents::types::{
    AssignmentOutput, AssignmentReason, Contributor, Issue, IssueAnalysisOutput,
};
use crate::error::{PrismError, PrismResult};
use crate::llm::{JsonSchemaSpec, LlmClient, LlmTask};

#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub activity_cap: f64,
    pub area_overlap: f64,
    pub merged_pr: f64,
    pub review: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            activity_cap: 2.0,
            area_overlap: 2.0,
            merged_pr: 0.05,
            review: 0.02,
        }
    }
}

pub fn score_contributor(
    analysis: &IssueAnalysisOutput,
    contributor: &Contributor,
    weights: &ScoreWeights,
) -> f64 {
    let mut score = contributor.recent_activity_score.min(weights.activity_cap);
    let overlap = analysis
        .required_skills
        .iter()
        .filter(|skill| contributor.areas.iter().any(|area| area == *skill))
        .count();
    score += overlap as f64 * weights.area_overlap;
    score += (contributor.merged_prs.min(10) as f64) * weights.merged_pr;
    score += (contributor.reviews.min(20) as f64) * weights.review;
    score
}

/// Deterministic assignment. Zero candidates yield an empty recommendation
/// with confidence 0.0.
pub fn recommend_assignee(
    analysis: &IssueAnalysisOutput,
    contributors: &[Contributor],
    limit: usize,
) -> AssignmentOutput {
    recommend_assignee_weighted(analysis, contributors, limit, &ScoreWeights::default())
}

pub fn recommend_assignee_weighted(
    analysis: &IssueAnalysisOutput,
    contributors: &[Contributor],
    limit: usize,
    weights: &ScoreWeights,
) -> AssignmentOutput {
    if contributors.is_empty() || limit == 0 {
        return AssignmentOutput {
            recommended_assignee: String::new(),
            confidence: 0.0,
            reasons: vec![],
            context_for_assignee: String::new(),
            alternative_assignees: vec![],
        };
    }

    let mut ranked: Vec<&Contributor> = contributors.iter().collect();
    ranked.sort_by(|a, b| {
        score_contributor(analysis, b, weights).total_cmp(&score_contributor(analysis, a, weights))
    });
    let top = ranked[0];
    let top_score = score_contributor(analysis, top, weights);
    let second_score = ranked
        .get(1)
        .map(|c| score_contributor(analysis, c, weights))
        .unwrap_or(0.0);

    let confidence = if top_score > 0.0 {
        (0.5 + (top_score - second_score) / top_score.max(1.0)).min(1.0)
    } else {
        0.5
    };

    let context = format!(
        "Issue type: {}\nPriority: {}\nKeywords: {}\nSuggested action: {}\n",
        analysis.issue_type.as_str(),
        analysis.priority.as_str(),
        if analysis.keywords.is_empty() {
            "n/a".to_string()
        } else {
            analysis.keywords.join(", ")
        },
        analysis.suggested_action.as_str(),
    );

    AssignmentOutput {
        recommended_assignee: top.login.clone(),
        confidence,
        reasons: build_reasons(analysis, top),
        context_for_assignee: context,
        alternative_assignees: ranked
            .iter()
            .skip(1)
            .take(limit.max(1).saturating_sub(1))
            .map(|c| c.login.clone())
            .collect(),
    }
}

pub fn assignment_schema() -> JsonSchemaSpec {
    JsonSchemaSpec::new(
        "assignment_output",
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "recommended_assignee": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "reasons": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "factor": {"type": "string"},
                            "explanation": {"type": "string"},
                            "score": {"type": "number", "minimum": 0, "maximum": 1}
                        },
                        "required": ["factor", "explanation", "score"]
                    }
                },
                "context_for_assignee": {"type": "string"},
                "alternative_assignees": {"type": "array", "items": {"type": "string"}}
            },
            "required": [
                "recommended_assignee", "confidence", "reasons",
                "context_for_assignee", "alternative_assignees"
            ]
        }),
    )
}

/// LLM assignment, constrained to the provided candidate set. An invented
/// assignee falls back to the deterministic ranking.
pub async fn recommend_assignee_llm(
    llm: &LlmClient,
    issue: &Issue,
    analysis: &IssueAnalysisOutput,
    contributors: &[Contributor],
    limit: usize,
) -> PrismResult<AssignmentOutput> {
    let system = "You are a DevRel assignment agent.\n\
                  Pick the best assignee among the provided candidates.\n\
                  Return only JSON and do not invent contributors outside the list.";
    let payload = json!({
        "issue": issue,
        "analysis": analysis,
        "contributors": contributors,
        "limit": limit,
    });
    let user = format!("Input:\n{payload}");
    let result = llm
        .generate_json(LlmTask::Assignment, system, &user, &assignment_schema(), 800)
        .await?;
    let out: AssignmentOutput =
        serde_json::from_value(result.data).map_err(|e| PrismError::Validation {
            stage: "assignment".to_string(),
            message: e.to_string(),
        })?;

    let allowed = contributors.iter().any(|c| c.login == out.recommended_assignee);
    if !out.recommended_assignee.is_empty() && !allowed {
        return Ok(recommend_assignee(analysis, contributors, limit));
    }
    Ok(out)
}

fn build_reasons(analysis: &IssueAnalysisOutput, contributor: &Contributor) -> Vec<AssignmentReason> {
    let mut reasons = Vec::new();
    let mut overlap: Vec<&str> = analysis
        .required_skills
        .iter()
        .filter(|skill| contributor.areas.iter().any(|area| area == *skill))
        .map(String::as_str)
        .collect();
    overlap.sort_unstable();
    if !overlap.is_empty() {
        reasons.push(AssignmentReason {
            factor: "skill_match".to_string(),
            explanation: format!("Overlapping areas: {}", overlap.join(", ")),
            score: (0.3 + 0.2 * overlap.len() as f64).min(1.0),
        });
    }
    reasons.push(AssignmentReason {
        factor: "recent_activity".to_string(),
        explanation: format!("recent_activity_score={}", contributor.recent_activity_score),
        score: (contributor.recent_activity_score / 5.0).min(1.0),
    });
    if contributor.merged_prs > 0 {
        reasons.push(AssignmentReason {
            factor: "merged_prs".to_string(),
            explanation: format!("merged_prs={}", contributor.merged_prs),
            score: (contributor.merged_prs as f64 / 20.0).min(1.0),
        });
    }
    if contributor.reviews > 0 {
        reasons.push(AssignmentReason {
            factor: "reviews".to_string(),
            explanation: format!("reviews={}", contributor.reviews),
            score: (contributor.reviews as f64 / 40.0).min(1.0),
        });
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::triage::analyze_issue;

    fn contributor(login: &str, areas: &[&str], activity: f64, prs: i64, reviews: i64) -> Contributor {
        Contributor {
            login: login.to_string(),
            areas: areas.iter().map(|a| a.to_string()).collect(),
            recent_activity_score: activity,
            merged_prs: prs,
            reviews,
        }
    }

    fn analysis() -> IssueAnalysisOutput {
        analyze_issue(&Issue {
            number: 1,
            title: "Redis cache timeout crash".to_string(),
            body: "redis cache falls over".to_string(),
            labels: vec!["bug".to_string()],
        })
    }

    #[test]
    fn zero_candidates_yield_empty_recommendation() {
        let out = recommend_assignee(&analysis(), &[], 3);
        assert_eq!(out.recommended_assignee, "");
        assert_eq!(out.confidence, 0.0);
        assert!(out.alternative_assignees.is_empty());
    }

    #[test]
    fn skill_overlap_beats_raw_activity() {
        let candidates = vec![
            contributor("generalist", &[], 5.0, 3, 3),
            contributor("cache-expert", &["cache", "debugging"], 1.0, 3, 3),
        ];
        let out = recommend_assignee(&analysis(), &candidates, 3);
        assert_eq!(out.recommended_assignee, "cache-expert");
        assert!(out.confidence > 0.5);
        assert_eq!(out.alternative_assignees, vec!["generalist".to_string()]);
        assert!(out
            .reasons
            .iter()
            .any(|reason| reason.factor == "skill_match"));
    }

    #[test]
    fn weights_are_pluggable() {
        let candidates = vec![
            contributor("busy", &[], 2.0, 0, 0),
            contributor("expert", &["cache"], 0.0, 0, 0),
        ];
        let flat = ScoreWeights {
            area_overlap: 0.0,
            ..ScoreWeights::default()
        };
        let out = recommend_assignee_weighted(&analysis(), &candidates, 2, &flat);
        assert_eq!(out.recommended_assignee, "busy");
    }
}
