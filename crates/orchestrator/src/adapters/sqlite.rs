//! SQLite-backed `PersistencePort` (spec §6), a closer analog of the
//! production relational store than [`super::memory::InMemoryPersistence`].
//!
//! Uses runtime-checked `sqlx::query` rather than the compile-time
//! `sqlx::query!` macro family, since the latter needs a live database
//! reachable at build time; that's a reasonable trade for a reference
//! adapter that ships without a pinned schema migration (see DESIGN.md).

use chrono::{DateTime, Utc};
use security_common::model::{Analysis, Ioc, Rule, RuleMatch, Technique};
use security_common::ports::PersistencePort;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect and apply the schema if it isn't already present.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(database_url).await?;
        let persistence = Self { pool };
        persistence.migrate().await?;
        Ok(persistence)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_results (
                analysis_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (analysis_id, kind)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_analysis(data: &str) -> Result<Analysis, String> {
    serde_json::from_str(data).map_err(|e| e.to_string())
}

#[async_trait::async_trait]
impl PersistencePort for SqlitePersistence {
    async fn save_analysis(&self, analysis: &Analysis) -> Result<(), String> {
        let data = serde_json::to_string(analysis).map_err(|e| e.to_string())?;
        sqlx::query("INSERT INTO analyses (id, data) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET data = excluded.data")
            .bind(analysis.id.to_string())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn load_analysis(&self, id: Uuid) -> Result<Option<Analysis>, String> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM analyses WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        row.map(|(data,)| row_to_analysis(&data)).transpose()
    }

    async fn list_analyses(&self) -> Result<Vec<Analysis>, String> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM analyses")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        rows.into_iter().map(|(data,)| row_to_analysis(&data)).collect()
    }

    async fn save_rule(&self, rule: &Rule) -> Result<(), String> {
        let data = serde_json::to_string(rule).map_err(|e| e.to_string())?;
        sqlx::query("INSERT INTO rules (id, data) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET data = excluded.data")
            .bind(rule.id.to_string())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<Rule>, String> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM rules")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_str(&data).map_err(|e: serde_json::Error| e.to_string()))
            .collect()
    }

    async fn save_matches(&self, analysis_id: Uuid, matches: &[RuleMatch]) -> Result<(), String> {
        save_result_blob(&self.pool, analysis_id, "matches", matches).await
    }

    async fn save_iocs(&self, analysis_id: Uuid, iocs: &[Ioc]) -> Result<(), String> {
        save_result_blob(&self.pool, analysis_id, "iocs", iocs).await
    }

    async fn save_techniques(&self, analysis_id: Uuid, techniques: &[Technique]) -> Result<(), String> {
        save_result_blob(&self.pool, analysis_id, "techniques", techniques).await
    }

    async fn update_rule_stats(&self, rule_id: Uuid, delta_matches: u64, last_matched: DateTime<Utc>) -> Result<(), String> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM rules WHERE id = ?1")
            .bind(rule_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        let Some((data,)) = row else { return Ok(()) };
        let mut rule: Rule = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        rule.match_count += delta_matches;
        rule.last_matched = Some(last_matched);
        self.save_rule(&rule).await
    }
}

async fn save_result_blob<T: serde::Serialize + ?Sized>(
    pool: &SqlitePool,
    analysis_id: Uuid,
    kind: &str,
    value: &T,
) -> Result<(), String> {
    let data = serde_json::to_string(value).map_err(|e| e.to_string())?;
    sqlx::query(
        "INSERT INTO analysis_results (analysis_id, kind, data) VALUES (?1, ?2, ?3) \
         ON CONFLICT(analysis_id, kind) DO UPDATE SET data = excluded.data",
    )
    .bind(analysis_id.to_string())
    .bind(kind)
    .bind(data)
    .execute(pool)
    .await
    .map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::Severity;

    async fn memory_store() -> SqlitePersistence {
        SqlitePersistence::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_an_analysis() {
        let store = memory_store().await;
        let analysis = Analysis::new("f.log", 10, "a".repeat(64)).unwrap();
        store.save_analysis(&analysis).await.unwrap();
        let loaded = store.load_analysis(analysis.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, analysis.id);
        assert_eq!(loaded.source_file_name, "f.log");
    }

    #[tokio::test]
    async fn update_rule_stats_persists_across_loads() {
        let store = memory_store().await;
        let rule = Rule::new(
            security_common::model::RuleType::SignaturePattern,
            "r",
            "c",
            Severity::Low,
        )
        .unwrap();
        store.save_rule(&rule).await.unwrap();
        store.update_rule_stats(rule.id, 4, Utc::now()).await.unwrap();
        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules[0].match_count, 4);
    }

    #[tokio::test]
    async fn missing_analysis_returns_none() {
        let store = memory_store().await;
        assert!(store.load_analysis(Uuid::new_v4()).await.unwrap().is_none());
    }
}
