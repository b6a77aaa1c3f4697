//! Per-run configuration (spec §4.F "Options"); doubles as the
//! in-process config struct the way the teacher's `LlmConfig` does.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisOptions {
    pub preferred_parser_id: Option<String>,
    pub deep_scan: bool,
    pub extract_iocs: bool,
    pub check_external: bool,
    pub enable_ai: bool,
    pub map_to_mitre: bool,
    /// `0` means unbounded (spec §4.F).
    pub max_events: usize,
    pub timeout_minutes: u64,
    pub include_rule_types: Vec<String>,
    pub exclude_rule_categories: Vec<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            preferred_parser_id: None,
            deep_scan: true,
            extract_iocs: true,
            check_external: false,
            enable_ai: false,
            map_to_mitre: true,
            max_events: 100_000,
            timeout_minutes: 30,
            include_rule_types: Vec::new(),
            exclude_rule_categories: Vec::new(),
        }
    }
}

/// Process-wide knobs that aren't per-analysis, loaded from the
/// environment the same `.ok().and_then(|v| v.parse().ok()).unwrap_or`
/// way `LlmConfig::from_env` does (spec §B "Config").
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_concurrent_analyses: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_analyses: std::env::var("ANALYSIS_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_concurrent_analyses: 5 }
    }
}
