//! Pipeline orchestration
//!
//! Wires authentication, extraction and loading together, processes one
//! date at a time across all configured scopes, and reports a per-run
//! summary with isolated per-unit failures.

mod orchestrator;

pub use orchestrator::{PipelineError, PipelineOrchestrator, PipelineResult, RunResult, UnitFailure};
