//! Per-dialect compiled-rule cache (spec §5 "Shared resources": process-
//! wide singleton, writes serialized by a per-structure mutex).

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::RuleEngineError;

pub struct DialectCache<T: Clone> {
    entries: Mutex<HashMap<Uuid, (String, T)>>,
}

impl<T: Clone> DialectCache<T> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached compiled rule if `content` is unchanged since
    /// the last compile, otherwise recompiles and atomically replaces
    /// the entry.
    pub fn get_or_compile(
        &self,
        id: Uuid,
        content: &str,
        compile: impl FnOnce(&str) -> Result<T, RuleEngineError>,
    ) -> Result<T, RuleEngineError> {
        let hash = format!("{:x}", Sha256::digest(content.as_bytes()));
        if let Some((cached_hash, compiled)) = self.entries.lock().unwrap().get(&id) {
            if *cached_hash == hash {
                return Ok(compiled.clone());
            }
        }
        let compiled = compile(content)?;
        self.entries.lock().unwrap().insert(id, (hash, compiled.clone()));
        Ok(compiled)
    }
}

impl<T: Clone> Default for DialectCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
