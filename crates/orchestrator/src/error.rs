//! Orchestrator error taxonomy (spec §7). `Cancelled` and `DependencyError`
//! are the only two variants that ever abort the whole pipeline; every
//! other failure mode (parser compile error, sandbox violation, rule
//! processing error) is isolated upstream and only ever shows up here as
//! data attached to the finished (possibly partial) result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cancelled or timed out")]
    Cancelled,

    #[error("dependency unavailable: {0}")]
    Dependency(String),

    #[error("no parser available for this file")]
    NoParserAvailable,

    #[error("parser execution failed: {0}")]
    ParseFailed(String),
}
