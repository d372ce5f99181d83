//! Prompt-update registry: proposed → approved | rejected → applied, with
//! atomic version bumping of the active role prompt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PrismResult;
use crate::storage::{CourtStore, PromptUpdateRecord, RolePrompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

pub struct PromptRegistry {
    store: Arc<dyn CourtStore>,
}

impl PromptRegistry {
    pub fn new(store: Arc<dyn CourtStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> PrismResult<PromptUpdateRecord> {
        self.store.get_prompt_update(id).await
    }

    pub async fn review(
        &self,
        id: Uuid,
        action: ReviewAction,
        comment: Option<String>,
        reviewed_by: Option<String>,
    ) -> PrismResult<PromptUpdateRecord> {
        self.store
            .review_prompt_update(id, action == ReviewAction::Approve, comment, reviewed_by)
            .await?;
        self.store.get_prompt_update(id).await
    }

    /// Apply an approved proposal. Inside one transaction the store locks the
    /// proposal row, bumps the role's version, activates the new prompt, and
    /// deactivates the rest; exactly one `is_active` row per role survives
    /// the commit. Returns the new version.
    pub async fn apply(&self, id: Uuid) -> PrismResult<i32> {
        self.store.apply_prompt_update(id).await
    }

    pub async fn active_prompt(&self, role: &str) -> PrismResult<Option<RolePrompt>> {
        self.store.active_role_prompt(role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::court::models::PromptUpdateProposal;
    use crate::error::PrismError;
    use crate::redaction::{RedactionPolicy, Redactor};
    use crate::storage::{MemoryCourtStore, PromptUpdateStatus};

    fn registry() -> (Arc<MemoryCourtStore>, PromptRegistry) {
        let redactor = Arc::new(Redactor::new(RedactionPolicy::builtin()).unwrap());
        let store = Arc::new(MemoryCourtStore::new(redactor));
        (store.clone(), PromptRegistry::new(store))
    }

    fn proposal(role: &str) -> PromptUpdateProposal {
        PromptUpdateProposal {
            role: role.to_string(),
            proposal: "SYSTEM: ask for reproduction steps first.".to_string(),
            reason: "Triage quality".to_string(),
            evidence_event_ids: vec![],
            agent_id: Some("agent-1".to_string()),
            from_version: Some("v1".to_string()),
        }
    }

    #[tokio::test]
    async fn full_lifecycle_bumps_active_prompt() {
        let (store, registry) = registry();
        store.insert_role_prompt("response", 1, "old prompt", true);
        let id = store.store_prompt_update(None, &proposal("response")).await.unwrap();

        let reviewed = registry
            .review(id, ReviewAction::Approve, Some("lgtm".into()), Some("lead".into()))
            .await
            .unwrap();
        assert_eq!(reviewed.status, PromptUpdateStatus::Approved);
        assert!(reviewed.approved_at.is_some());

        let version = registry.apply(id).await.unwrap();
        assert_eq!(version, 2);

        let record = registry.get(id).await.unwrap();
        assert_eq!(record.status, PromptUpdateStatus::Applied);
        assert!(record.applied_at.is_some());

        let active = registry.active_prompt("response").await.unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert_eq!(active.prompt, "SYSTEM: ask for reproduction steps first.");
        let all = store.role_prompts_for_role("response");
        assert_eq!(all.iter().filter(|p| p.is_active).count(), 1);
    }

    #[tokio::test]
    async fn rejected_proposal_cannot_be_applied() {
        let (store, registry) = registry();
        let id = store.store_prompt_update(None, &proposal("docs")).await.unwrap();
        registry
            .review(id, ReviewAction::Reject, Some("not convincing".into()), None)
            .await
            .unwrap();
        let err = registry.apply(id).await.unwrap_err();
        assert!(matches!(err, PrismError::InvalidState(_)));
    }

    #[tokio::test]
    async fn double_review_is_invalid_state() {
        let (store, registry) = registry();
        let id = store.store_prompt_update(None, &proposal("docs")).await.unwrap();
        registry.review(id, ReviewAction::Approve, None, None).await.unwrap();
        let err = registry
            .review(id, ReviewAction::Reject, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PrismError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unknown_proposal_is_not_found() {
        let (_, registry) = registry();
        let err = registry.apply(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PrismError::NotFound(_)));
    }
}
