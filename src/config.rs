//! Process configuration, loaded once at startup into an immutable value and
//! passed explicitly into each component constructor.

use std::path::PathBuf;

use crate::error::{PrismError, PrismResult};

pub const DEFAULT_REDACTION_POLICY_PATH: &str = "policies/redaction-policy.default.json";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 3072;

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres DSN. Required for storage, migrations, KB and court.
    pub database_url: Option<String>,
    /// LLM credential. Absence degrades agents to deterministic heuristics.
    pub openai_api_key: Option<String>,
    /// Forge credential for ingestion.
    pub github_token: Option<String>,
    /// Embedding model name and dimensionality recorded as provenance.
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    /// Path to the redaction policy JSON.
    pub redaction_policy_path: PathBuf,
}

impl AppConfig {
    /// Read configuration from the environment. `.env` loading (dotenvy) is
    /// the binary's responsibility and happens before this call.
    pub fn from_env() -> Self {
        let embedding_dimensions = std::env::var("PRISM_EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);

        Self {
            database_url: non_empty(std::env::var("DATABASE_URL").ok()),
            openai_api_key: non_empty(std::env::var("OPENAI_API_KEY").ok()),
            github_token: non_empty(std::env::var("GITHUB_TOKEN").ok())
                .or_else(|| non_empty(std::env::var("GH_TOKEN").ok())),
            embedding_model: std::env::var("PRISM_EMBEDDING_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions,
            redaction_policy_path: std::env::var("REDACTION_POLICY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_REDACTION_POLICY_PATH)),
        }
    }

    /// Database URL, or a configuration error for commands that need storage.
    pub fn require_database_url(&self) -> PrismResult<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| PrismError::Configuration("Missing DATABASE_URL".to_string()))
    }

    /// Forge token, or a configuration error for commands that hydrate.
    pub fn require_github_token(&self) -> PrismResult<&str> {
        self.github_token.as_deref().ok_or_else(|| {
            PrismError::Configuration(
                "Missing GitHub token. Set GITHUB_TOKEN (recommended) or GH_TOKEN".to_string(),
            )
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_url_is_configuration_error() {
        let config = AppConfig {
            database_url: None,
            openai_api_key: None,
            github_token: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            redaction_policy_path: PathBuf::from(DEFAULT_REDACTION_POLICY_PATH),
        };
        let err = config.require_database_url().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
