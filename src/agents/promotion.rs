//! Contributor promotion-readiness evaluation.

use serde_json::json;

use crate::agents::types::{Contributor, PromotionEvidence, PromotionOutput};
use crate::error::{PrismError, PrismResult};
use crate::llm::{JsonSchemaSpec, LlmClient, LlmTask};

pub fn evaluate_promotion(contributor: &Contributor) -> PromotionOutput {
    let current_stage = infer_stage(contributor);
    let suggested_stage = suggest_next_stage(current_stage, contributor);

    let evidence = vec![
        PromotionEvidence {
            criterion: "recent_activity".to_string(),
            status: if contributor.recent_activity_score >= 2.5 { "met" } else { "not_met" }
                .to_string(),
            detail: format!("recent_activity_score={}", contributor.recent_activity_score),
        },
        PromotionEvidence {
            criterion: "merged_prs".to_string(),
            status: if contributor.merged_prs >= 2 { "met" } else { "not_met" }.to_string(),
            detail: format!("merged_prs={}", contributor.merged_prs),
        },
        PromotionEvidence {
            criterion: "reviews".to_string(),
            status: if contributor.reviews >= 3 { "met" } else { "not_met" }.to_string(),
            detail: format!("reviews={}", contributor.reviews),
        },
    ];

    let is_candidate = suggested_stage != current_stage;
    let confidence = if is_candidate {
        (0.5 + contributor.recent_activity_score / 10.0).min(1.0)
    } else {
        0.4
    };

    let recommendation = if is_candidate {
        format!("Consider promoting @{} to {suggested_stage}.", contributor.login)
    } else {
        format!("No promotion suggested for @{}.", contributor.login)
    };

    PromotionOutput {
        is_candidate,
        current_stage: current_stage.to_string(),
        suggested_stage: suggested_stage.to_string(),
        confidence,
        evidence,
        recommendation,
    }
}

pub fn promotion_schema() -> JsonSchemaSpec {
    JsonSchemaSpec::new(
        "promotion_output",
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "is_candidate": {"type": "boolean"},
                "current_stage": {"type": "string"},
                "suggested_stage": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "evidence": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "criterion": {"type": "string"},
                            "status": {"type": "string"},
                            "detail": {"type": "string"}
                        },
                        "required": ["criterion", "status", "detail"]
                    }
                },
                "recommendation": {"type": "string"}
            },
            "required": [
                "is_candidate", "current_stage", "suggested_stage",
                "confidence", "evidence", "recommendation"
            ]
        }),
    )
}

pub async fn evaluate_promotion_llm(
    llm: &LlmClient,
    contributor: &Contributor,
) -> PrismResult<PromotionOutput> {
    let system = "You are a DevRel agent that evaluates contributor promotion readiness.\n\
                  Use only the provided metrics. Return JSON only.";
    let user = format!("Contributor:\n{}", json!(contributor));
    let result = llm
        .generate_json(LlmTask::Promotion, system, &user, &promotion_schema(), 600)
        .await?;
    serde_json::from_value(result.data).map_err(|e| PrismError::Validation {
        stage: "promotion".to_string(),
        message: e.to_string(),
    })
}

fn infer_stage(contributor: &Contributor) -> &'static str {
    if contributor.merged_prs >= 30 {
        "MAINTAINER"
    } else if contributor.merged_prs >= 10 {
        "CORE"
    } else if contributor.merged_prs >= 2 {
        "REGULAR"
    } else if contributor.merged_prs >= 1 {
        "FIRST_TIMER"
    } else {
        "NEW"
    }
}

fn suggest_next_stage(current_stage: &'static str, contributor: &Contributor) -> &'static str {
    match current_stage {
        "NEW" if contributor.merged_prs >= 1 => "FIRST_TIMER",
        "FIRST_TIMER" if contributor.merged_prs >= 2 => "REGULAR",
        "REGULAR" if contributor.merged_prs >= 10 => "CORE",
        "CORE" if contributor.merged_prs >= 30 => "MAINTAINER",
        other => other,
    }
}
