//! Error taxonomy for the plugin host (spec §4.B, §7).

use thiserror::Error;

/// One structured compilation diagnostic (spec §4.B "Failure semantics").
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CompileDiagnostic {
    pub code: String,
    pub line: u32,
    pub column: u32,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

#[derive(Debug, Error)]
pub enum PluginHostError {
    /// Source failed the deny-list/size/allow-list check (spec §4.B
    /// "Security scan"); fatal for that parser, never registered.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Source did not compile to a valid module; carries the full
    /// diagnostic list so callers can surface `{code, line, column,
    /// severity, message}` without re-parsing the failure.
    #[error("compilation failed with {} diagnostic(s)", .0.len())]
    CompilationError(Vec<CompileDiagnostic>),

    /// Wall-clock, memory, or CPU cap exceeded during one execution;
    /// fatal only for that execution (spec §7 `SandboxViolation`).
    #[error("sandbox violation: {0}")]
    SandboxViolation(#[from] SandboxViolation),

    #[error("no parser registered under handle {0}")]
    UnknownHandle(uuid::Uuid),

    #[error("guest trapped: {0}")]
    GuestTrap(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("execution exceeded {limit_ms} ms wall-clock budget")]
    Timeout { limit_ms: u64 },

    #[error("execution exceeded {limit_mib} MiB memory budget")]
    ResourceExhausted { limit_mib: u64 },
}
