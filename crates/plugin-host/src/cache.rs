//! Bounded LRU cache of compiled artifacts, keyed by parser id (spec
//! §4.B "Caching"). A reload replaces the entry atomically.

use indexmap::IndexMap;
use std::time::Instant;
use uuid::Uuid;

use crate::CompiledArtifact;

struct Slot {
    artifact: CompiledArtifact,
    last_access: Instant,
}

/// Evicts the least-recently-accessed entry once `capacity` is exceeded.
/// `IndexMap` gives us insertion order for free; recency is tracked
/// separately so a cache hit doesn't require re-shuffling the map.
pub struct ArtifactCache {
    capacity: usize,
    slots: IndexMap<Uuid, Slot>,
}

impl ArtifactCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: IndexMap::new(),
        }
    }

    pub fn get(&mut self, id: Uuid) -> Option<CompiledArtifact> {
        let slot = self.slots.get_mut(&id)?;
        slot.last_access = Instant::now();
        Some(slot.artifact.clone())
    }

    /// Insert or atomically replace the entry for `id`.
    pub fn put(&mut self, id: Uuid, artifact: CompiledArtifact) {
        self.slots.insert(
            id,
            Slot {
                artifact,
                last_access: Instant::now(),
            },
        );
        self.evict_if_needed();
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        self.slots.shift_remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn evict_if_needed(&mut self) {
        while self.slots.len() > self.capacity {
            let Some(lru_id) = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(id, _)| *id)
            else {
                break;
            };
            self.slots.shift_remove(&lru_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn artifact() -> CompiledArtifact {
        let engine = Engine::default();
        let module = wasmtime::Module::new(&engine, wat::parse_str("(module)").unwrap()).unwrap();
        CompiledArtifact::new(module, "x".into(), Vec::new())
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ArtifactCache::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        cache.put(a, artifact());
        cache.put(b, artifact());
        assert!(cache.get(a).is_some()); // a is now most-recent
        cache.put(c, artifact()); // evicts b, not a
        assert_eq!(cache.len(), 2);
        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert!(cache.get(c).is_some());
    }

    #[test]
    fn reload_replaces_atomically() {
        let mut cache = ArtifactCache::new(2);
        let id = Uuid::new_v4();
        cache.put(id, artifact());
        cache.put(id, artifact());
        assert_eq!(cache.len(), 1);
    }
}
