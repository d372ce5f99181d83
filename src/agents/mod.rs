//! DevRel agents over the knowledge base.
//!
//! Each agent exists in two forms: a deterministic heuristic (always
//! available) and an LLM variant used when a credential is configured. Both
//! produce the same typed outputs.

pub mod assignment;
pub mod docs;
pub mod promotion;
pub mod response;
pub mod triage;
pub mod types;

pub use types::{
    AssignmentOutput, Contributor, DocGapOutput, Issue, IssueAnalysisOutput, IssueType, Priority,
    PromotionOutput, ResponseOutput, ResponseStrategy,
};
