//! Error taxonomy for the rule engine (spec §4.D, §7).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleEngineError {
    /// Malformed rule content; surfaced per-rule, never aborts the
    /// dispatcher (spec §7 `InputError`).
    #[error("[{code}] {line}:{column}: {message}")]
    Input {
        code: String,
        line: u32,
        column: u32,
        message: String,
    },

    /// Internal failure inside a processor; isolated at the dispatcher
    /// boundary (spec §7 `ProcessingError`).
    #[error("processing error: {0}")]
    Processing(String),
}

impl RuleEngineError {
    pub fn input(code: &str, message: impl Into<String>) -> Self {
        Self::Input { code: code.into(), line: 0, column: 0, message: message.into() }
    }
}
