//! Per-task model selection.
//!
//! Each task has a default model; `OPENAI_MODEL_{TASK}` overrides it. The
//! override table is read once at construction and carried as a value.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmTask {
    IssueTriage,
    Assignment,
    Response,
    Docs,
    Promotion,
    Judge,
}

impl LlmTask {
    pub const ALL: [LlmTask; 6] = [
        LlmTask::IssueTriage,
        LlmTask::Assignment,
        LlmTask::Response,
        LlmTask::Docs,
        LlmTask::Promotion,
        LlmTask::Judge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmTask::IssueTriage => "issue_triage",
            LlmTask::Assignment => "assignment",
            LlmTask::Response => "response",
            LlmTask::Docs => "docs",
            LlmTask::Promotion => "promotion",
            LlmTask::Judge => "judge",
        }
    }

    pub fn env_key(&self) -> String {
        format!("OPENAI_MODEL_{}", self.as_str().to_uppercase())
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmTask::IssueTriage => "gpt-4.1-mini",
            LlmTask::Assignment => "gpt-4.1",
            LlmTask::Response => "gpt-5-mini",
            LlmTask::Docs => "gpt-4.1",
            LlmTask::Promotion => "gpt-5",
            LlmTask::Judge => "gpt-4.1-mini",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    overrides: HashMap<LlmTask, String>,
}

impl ModelSelector {
    pub fn from_env() -> Self {
        let mut overrides = HashMap::new();
        for task in LlmTask::ALL {
            if let Ok(model) = std::env::var(task.env_key()) {
                if !model.trim().is_empty() {
                    overrides.insert(task, model);
                }
            }
        }
        Self { overrides }
    }

    pub fn with_override(mut self, task: LlmTask, model: impl Into<String>) -> Self {
        self.overrides.insert(task, model.into());
        self
    }

    pub fn model_for(&self, task: LlmTask) -> &str {
        self.overrides
            .get(&task)
            .map(String::as_str)
            .unwrap_or_else(|| task.default_model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_overrides() {
        let selector = ModelSelector::default();
        assert_eq!(selector.model_for(LlmTask::Judge), "gpt-4.1-mini");
        assert_eq!(selector.model_for(LlmTask::Promotion), "gpt-5");
    }

    #[test]
    fn override_wins() {
        let selector = ModelSelector::default().with_override(LlmTask::Judge, "gpt-4.1");
        assert_eq!(selector.model_for(LlmTask::Judge), "gpt-4.1");
    }

    #[test]
    fn env_keys_match_task_names() {
        assert_eq!(LlmTask::IssueTriage.env_key(), "OPENAI_MODEL_ISSUE_TRIAGE");
        assert_eq!(LlmTask::Judge.env_key(), "OPENAI_MODEL_JUDGE");
    }
}
