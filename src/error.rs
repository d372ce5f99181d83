//! Error taxonomy for the pipeline.
//!
//! Transient transport and rate-limit errors are retried close to where they
//! occur; semantic and validation errors surface to the orchestrator, which
//! journals them as case events and continues; redaction refusals fail the
//! specific write and are never swallowed.

use thiserror::Error;

/// Result type used throughout the crate.
pub type PrismResult<T> = Result<T, PrismError>;

#[derive(Debug, Error)]
pub enum PrismError {
    /// Missing credentials, unknown model, unreadable policy file. Fatal at
    /// startup; CLIs map this to exit code 2.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network-level failure (timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream asked us to back off (429, secondary 403, reset header).
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// HTTP >= 400 after retries, or a 200 GraphQL envelope carrying errors.
    #[error("upstream error: {0}")]
    UpstreamSemantic(String),

    /// Agent output failed JSON-schema validation or typed parsing.
    #[error("validation error in {stage}: {message}")]
    Validation { stage: String, message: String },

    /// The persistence guard found a string matching an enabled redaction
    /// rule. Identifies the rule and the JSON path of the offending value.
    #[error("unredacted data detected (rule={rule_name}, path={json_path})")]
    UnredactedData { rule_name: String, json_path: String },

    /// Illegal prompt-update transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown case / court run / proposal.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrismError {
    /// Process exit code for CLI entry points.
    pub fn exit_code(&self) -> i32 {
        match self {
            PrismError::Configuration(_) => 2,
            _ => 1,
        }
    }
}
