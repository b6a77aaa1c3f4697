//! In-memory persistence adapter and a filesystem-backed blob store.
//! Reference/test implementations only (spec §1 "relational store" and
//! "file storage" are external collaborators); not the production stack.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use security_common::model::{Analysis, Ioc, Rule, RuleMatch, Technique};
use security_common::ports::{BlobStorePort, PersistencePort};
use uuid::Uuid;

#[derive(Default)]
struct State {
    analyses: HashMap<Uuid, Analysis>,
    rules: HashMap<Uuid, Rule>,
    matches: HashMap<Uuid, Vec<RuleMatch>>,
    iocs: HashMap<Uuid, Vec<Ioc>>,
    techniques: HashMap<Uuid, Vec<Technique>>,
}

/// `PersistencePort` backed by a `Mutex`-guarded in-process map.
#[derive(Default)]
pub struct InMemoryPersistence {
    state: Mutex<State>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn save_analysis(&self, analysis: &Analysis) -> Result<(), String> {
        self.state.lock().unwrap().analyses.insert(analysis.id, analysis.clone());
        Ok(())
    }

    async fn load_analysis(&self, id: Uuid) -> Result<Option<Analysis>, String> {
        Ok(self.state.lock().unwrap().analyses.get(&id).cloned())
    }

    async fn list_analyses(&self) -> Result<Vec<Analysis>, String> {
        Ok(self.state.lock().unwrap().analyses.values().cloned().collect())
    }

    async fn save_rule(&self, rule: &Rule) -> Result<(), String> {
        self.state.lock().unwrap().rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<Rule>, String> {
        Ok(self.state.lock().unwrap().rules.values().cloned().collect())
    }

    async fn save_matches(&self, analysis_id: Uuid, matches: &[RuleMatch]) -> Result<(), String> {
        self.state.lock().unwrap().matches.insert(analysis_id, matches.to_vec());
        Ok(())
    }

    async fn save_iocs(&self, analysis_id: Uuid, iocs: &[Ioc]) -> Result<(), String> {
        self.state.lock().unwrap().iocs.insert(analysis_id, iocs.to_vec());
        Ok(())
    }

    async fn save_techniques(&self, analysis_id: Uuid, techniques: &[Technique]) -> Result<(), String> {
        self.state.lock().unwrap().techniques.insert(analysis_id, techniques.to_vec());
        Ok(())
    }

    async fn update_rule_stats(&self, rule_id: Uuid, delta_matches: u64, last_matched: DateTime<Utc>) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        if let Some(rule) = state.rules.get_mut(&rule_id) {
            rule.match_count += delta_matches;
            rule.last_matched = Some(last_matched);
        }
        Ok(())
    }
}

/// `BlobStorePort` backed by a base directory on disk, one subdirectory
/// per upload id. Files are read as UTF-8 text (spec §6).
pub struct FilesystemBlobStore {
    base_dir: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

#[async_trait]
impl BlobStorePort for FilesystemBlobStore {
    async fn list(&self, upload_id: &str) -> Result<Vec<String>, String> {
        let dir = self.base_dir.join(upload_id);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| format!("cannot list {}: {e}", dir.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn open(&self, upload_id: &str, file_name: &str) -> Result<String, String> {
        let path = self.base_dir.join(upload_id).join(file_name);
        tokio::fs::read_to_string(&path).await.map_err(|e| format!("cannot read {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persistence_round_trips_an_analysis() {
        let store = InMemoryPersistence::new();
        let analysis = Analysis::new("f.log", 10, "a".repeat(64)).unwrap();
        store.save_analysis(&analysis).await.unwrap();
        let loaded = store.load_analysis(analysis.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, analysis.id);
    }

    #[tokio::test]
    async fn update_rule_stats_accumulates() {
        let store = InMemoryPersistence::new();
        let rule = Rule::new(security_common::model::RuleType::SignaturePattern, "r", "c", security_common::model::Severity::Low).unwrap();
        store.save_rule(&rule).await.unwrap();
        store.update_rule_stats(rule.id, 3, Utc::now()).await.unwrap();
        store.update_rule_stats(rule.id, 2, Utc::now()).await.unwrap();
        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules[0].match_count, 5);
    }

    #[tokio::test]
    async fn blob_store_reads_utf8_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("upload-1")).unwrap();
        std::fs::write(dir.path().join("upload-1/log.txt"), "hello").unwrap();

        let store = FilesystemBlobStore::new(dir.path());
        let files = store.list("upload-1").await.unwrap();
        assert_eq!(files, vec!["log.txt".to_string()]);
        let content = store.open("upload-1", "log.txt").await.unwrap();
        assert_eq!(content, "hello");
    }
}
