//! LLM integration: a JSON-schema-constrained chat client and per-task model
//! selection with environment overrides.

pub mod client;
pub mod model_selector;

pub use client::{JsonSchemaSpec, LlmClient, LlmJson};
pub use model_selector::{LlmTask, ModelSelector};
