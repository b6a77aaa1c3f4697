//! Error taxonomy shared across the engine (spec §7).
//!
//! `InputError` and `CompilationError` style failures are always data —
//! they travel as `Err` variants here, never as panics. Only genuinely
//! unexpected states (a constructed entity violating its own invariants)
//! should ever `panic!`/`unwrap`.

use thiserror::Error;

/// Errors raised while constructing or validating shared entities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} has invalid format: {value}")]
    InvalidFormat { field: &'static str, value: String },

    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// A dependency (persistence or blob store) was unavailable (spec §7
/// `DependencyError`). This always aborts the pipeline.
#[derive(Debug, Error)]
#[error("dependency unavailable: {0}")]
pub struct DependencyError(pub String);
