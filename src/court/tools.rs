//! Tool surface handed to stage agents. Every return value passes through
//! the redactor before handoff; agents never see raw case data.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::court::models::{Case, CaseEvent};
use crate::error::PrismResult;
use crate::lessons::LessonService;
use crate::redaction::Redactor;
use crate::storage::CourtStore;

pub struct CourtTools {
    store: Arc<dyn CourtStore>,
    redactor: Arc<Redactor>,
    lessons: Arc<LessonService>,
    case_id: Uuid,
}

impl CourtTools {
    pub fn new(
        store: Arc<dyn CourtStore>,
        redactor: Arc<Redactor>,
        lessons: Arc<LessonService>,
        case_id: Uuid,
    ) -> Self {
        Self {
            store,
            redactor,
            lessons,
            case_id,
        }
    }

    pub async fn get_case(&self) -> PrismResult<Value> {
        let case = self.store.get_case(self.case_id).await?;
        Ok(case_context(&case, &self.redactor))
    }

    /// Case events ordered by `(ts, seq)`, redacted.
    pub async fn list_case_events(&self) -> PrismResult<Vec<Value>> {
        let events = self.store.list_case_events(self.case_id).await?;
        Ok(events
            .iter()
            .map(|event| event_context(event, &self.redactor))
            .collect())
    }

    /// Role-scoped lesson recall, redacted.
    pub async fn search_lessons(&self, role: &str, query: &str, k: usize) -> PrismResult<Value> {
        let hits = self.lessons.search_lessons(role, query, k).await?;
        let raw: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "id": hit.record.id,
                    "case_id": hit.record.case_id,
                    "distance": hit.distance,
                    "lesson": hit.record.lesson,
                })
            })
            .collect();
        Ok(self.redactor.redact(&Value::Array(raw)))
    }
}

/// Redacted case view handed to agents and used as the court's base context.
pub fn case_context(case: &Case, redactor: &Redactor) -> Value {
    json!({
        "id": case.id,
        "source": redactor.redact(&case.source),
        "metadata": redactor.redact(&case.metadata),
        "result": redactor.redact(&case.result),
        "feedback": redactor.redact(&case.feedback),
        "redaction_policy_version": case.redaction_policy_version,
        "created_at": case.created_at.to_rfc3339(),
    })
}

/// Redacted event view: content, meta, and usage are the only fields that can
/// carry free text.
pub fn event_context(event: &CaseEvent, redactor: &Redactor) -> Value {
    let mut out = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    if let Some(map) = out.as_object_mut() {
        let content = map
            .get("content")
            .map(|v| redactor.redact(v))
            .unwrap_or(Value::Null);
        map.insert("content".to_string(), content);
        for key in ["meta", "usage"] {
            if let Some(value) = map.get(key) {
                let redacted = redactor.redact(value);
                map.insert(key.to_string(), redacted);
            }
        }
    }
    out
}
