//! The retrospective court: a four-stage debate (prosecutor / defense / jury
//! in parallel, then a judge) over a single agent decision, journaled as
//! append-only case events and persisted through the redaction guard.

pub mod models;
pub mod orchestrator;
pub mod runner;
pub mod tools;

pub use models::{
    ActorType, Case, CaseEvent, CourtRunStatus, EventType, JudgeOutput, Lesson, Polarity, Stage,
    StageOutput,
};
pub use orchestrator::{CourtOrchestrator, CourtRunSummary, CourtStreamEvent};
pub use runner::{AgentRunner, HeuristicAgentRunner, LlmAgentRunner, StageRunResult};
pub use tools::CourtTools;
