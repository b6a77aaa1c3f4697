//! External collaborator interfaces (spec §6). The core depends on these
//! traits; it never implements the production HTTP/DB/UI stack behind
//! them — that's explicitly out of scope (spec §1).

use crate::model::{Analysis, Ioc, Rule, RuleMatch, Technique};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Persistence port: `save`/`load`/`list` for every entity plus the rule
/// match-count rollup (spec §6).
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn save_analysis(&self, analysis: &Analysis) -> Result<(), String>;
    async fn load_analysis(&self, id: Uuid) -> Result<Option<Analysis>, String>;
    async fn list_analyses(&self) -> Result<Vec<Analysis>, String>;

    async fn save_rule(&self, rule: &Rule) -> Result<(), String>;
    async fn list_rules(&self) -> Result<Vec<Rule>, String>;

    async fn save_matches(&self, analysis_id: Uuid, matches: &[RuleMatch]) -> Result<(), String>;
    async fn save_iocs(&self, analysis_id: Uuid, iocs: &[Ioc]) -> Result<(), String>;
    async fn save_techniques(&self, analysis_id: Uuid, techniques: &[Technique]) -> Result<(), String>;

    /// Cumulative match-count / last-matched rollup (spec §4.D.1).
    async fn update_rule_stats(
        &self,
        rule_id: Uuid,
        delta_matches: u64,
        last_matched: DateTime<Utc>,
    ) -> Result<(), String>;
}

/// Blob store port: UTF-8 text artifacts only (spec §6).
#[async_trait]
pub trait BlobStorePort: Send + Sync {
    async fn list(&self, upload_id: &str) -> Result<Vec<String>, String>;
    async fn open(&self, upload_id: &str, file_name: &str) -> Result<String, String>;
}

/// Kind of message published to the progress sink (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Progress,
    RuleMatch,
    IocFound,
    Completed,
    Error,
}

/// A single progress sink message; `payload` is already-serialized JSON
/// so the sink implementation never needs to know the concrete shape.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    pub analysis_id: Uuid,
    pub kind: ProgressKind,
    pub payload: serde_json::Value,
}

/// Progress sink port: best-effort delivery, must never block
/// orchestration for long (spec §6).
#[async_trait]
pub trait ProgressSinkPort: Send + Sync {
    async fn publish(&self, message: ProgressMessage);
}

/// AI summarization is a pure sink consuming the finished result (spec
/// §1); the core only needs the seam, not an implementation.
#[async_trait]
pub trait AiSummarySink: Send + Sync {
    async fn summarize(&self, analysis_id: Uuid, result_json: serde_json::Value) -> Result<String, String>;
}
