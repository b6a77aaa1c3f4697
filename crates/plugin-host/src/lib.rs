//! Parser plugin host (spec §4.B).
//!
//! User-supplied parser code is WAT/WASM text turning a raw blob into an
//! ordered sequence of `LogEvent`s. `compile` never touches `wasmtime`
//! until the textual security scan has passed; `execute` runs the guest
//! under fresh per-call caps and never lets a sandbox violation evict an
//! already-registered parser.

pub mod cache;
pub mod error;
pub mod security;
mod sandbox;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use security_common::model::LogEvent;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use wasmtime::{Engine, Module};

pub use error::{CompileDiagnostic, DiagnosticSeverity, PluginHostError, SandboxViolation};
pub use sandbox::SandboxLimits;

use cache::ArtifactCache;

/// A compiled parser, memoized by id (spec §4.B "Caching").
#[derive(Clone)]
pub struct CompiledArtifact {
    module: Module,
    pub source_hash: String,
    pub declared_capabilities: Vec<String>,
    pub compiled_at: chrono::DateTime<Utc>,
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("source_hash", &self.source_hash)
            .field("declared_capabilities", &self.declared_capabilities)
            .field("compiled_at", &self.compiled_at)
            .finish()
    }
}

impl CompiledArtifact {
    pub fn new(module: Module, source_hash: String, declared_capabilities: Vec<String>) -> Self {
        Self {
            module,
            source_hash,
            declared_capabilities,
            compiled_at: Utc::now(),
        }
    }
}

/// A registry handle returned by `load` (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub Uuid);

/// Outcome of a single parser execution.
#[derive(Debug)]
pub struct ParseResult {
    pub events: Vec<LogEvent>,
}

/// Min/mean/max wall-clock across N `benchmark` iterations.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkStats {
    pub iterations: u32,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

struct RegistryEntry {
    artifact: CompiledArtifact,
}

/// Owns the `wasmtime::Engine`, the compiled-artifact cache, and the
/// loaded-parser registry. One instance is shared across an analysis
/// run; every method is safe to call concurrently.
pub struct PluginHost {
    engine: Engine,
    limits: SandboxLimits,
    cache: Mutex<ArtifactCache>,
    registry: Mutex<HashMap<Uuid, RegistryEntry>>,
}

impl PluginHost {
    pub fn new(limits: SandboxLimits) -> Self {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).expect("wasmtime engine configuration is static and valid");
        Self {
            engine,
            limits,
            cache: Mutex::new(ArtifactCache::new(32)),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Static validation, security scan, and translation to an
    /// executable form (spec §4.B `compile`).
    pub fn compile(&self, source: &str) -> Result<CompiledArtifact, PluginHostError> {
        security::scan_source(source)?;

        let wasm_bytes = wat::parse_str(source).map_err(|e| {
            PluginHostError::CompilationError(vec![parse_wat_error(&e.to_string())])
        })?;
        security::scan_compiled_size(&wasm_bytes)?;

        let module = Module::new(&self.engine, &wasm_bytes).map_err(|e| {
            PluginHostError::CompilationError(vec![CompileDiagnostic {
                code: "E_MODULE".into(),
                line: 0,
                column: 0,
                severity: DiagnosticSeverity::Error,
                message: e.to_string(),
            }])
        })?;

        let declared_capabilities = module
            .imports()
            .map(|i| format!("{}::{}", i.module(), i.name()))
            .collect();

        let source_hash = format!("{:x}", Sha256::digest(source.as_bytes()));
        Ok(CompiledArtifact::new(module, source_hash, declared_capabilities))
    }

    /// Place a compiled artifact into the plugin registry under `id`
    /// (spec §4.B `load`); also memoizes it in the LRU cache.
    pub fn load(&self, id: Uuid, artifact: CompiledArtifact) -> Handle {
        self.cache.lock().unwrap().put(id, artifact.clone());
        self.registry.lock().unwrap().insert(id, RegistryEntry { artifact });
        Handle(id)
    }

    /// Drop the registry entry and release the cached module handle
    /// (spec §4.B `unload`).
    pub fn unload(&self, id: Uuid) -> bool {
        let removed_registry = self.registry.lock().unwrap().remove(&id).is_some();
        let removed_cache = self.cache.lock().unwrap().remove(id);
        removed_registry || removed_cache
    }

    /// Run the parser behind `handle` over `raw` inside a fresh sandbox
    /// (spec §4.B `execute`). A sandbox violation is reported for this
    /// call only; the parser stays registered.
    pub fn execute(&self, handle: Handle, raw: &[u8]) -> Result<ParseResult, PluginHostError> {
        let module = self.artifact_module(handle)?;
        let out = sandbox::run_guest(&self.engine, &module, raw, &self.limits)?;
        let events: Vec<LogEvent> = serde_json::from_slice(&out)
            .map_err(|e| PluginHostError::GuestTrap(format!("guest output was not valid LogEvent JSON: {e}")))?;
        Ok(ParseResult { events })
    }

    /// Run `iterations` executions back to back and report min/mean/max
    /// wall-clock (spec §4.B `benchmark`).
    pub fn benchmark(
        &self,
        handle: Handle,
        raw: &[u8],
        iterations: u32,
    ) -> Result<BenchmarkStats, PluginHostError> {
        let module = self.artifact_module(handle)?;
        let mut samples = Vec::with_capacity(iterations as usize);
        for _ in 0..iterations.max(1) {
            let started = Instant::now();
            sandbox::run_guest(&self.engine, &module, raw, &self.limits)?;
            samples.push(started.elapsed().as_secs_f64() * 1000.0);
        }
        let min_ms = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        Ok(BenchmarkStats { iterations, min_ms, mean_ms, max_ms })
    }

    fn artifact_module(&self, handle: Handle) -> Result<Module, PluginHostError> {
        if let Some(artifact) = self.cache.lock().unwrap().get(handle.0) {
            return Ok(artifact.module);
        }
        let registry = self.registry.lock().unwrap();
        registry
            .get(&handle.0)
            .map(|entry| entry.artifact.module.clone())
            .ok_or(PluginHostError::UnknownHandle(handle.0))
    }
}

fn parse_wat_error(message: &str) -> CompileDiagnostic {
    CompileDiagnostic {
        code: "E_PARSE".into(),
        line: 0,
        column: 0,
        severity: DiagnosticSeverity::Error,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A guest module exporting `memory`, `alloc`, and `parse`, which
    /// ignores its input and always emits one fixed `LogEvent`.
    fn echo_one_event_wat() -> String {
        let payload = serde_json::to_string(&[LogEvent {
            line_number: 1,
            raw_text: "hello".into(),
            timestamp: None,
            level: "info".into(),
            source: "guest".into(),
            message: "hello".into(),
            fields: Default::default(),
        }])
        .unwrap();
        let bytes: Vec<String> = payload.bytes().map(|b| format!("(i32.const {b})")).collect();
        let stores: String = bytes
            .iter()
            .enumerate()
            .map(|(i, b)| format!("(i32.store8 (i32.const {}) {b})\n", 4096 + i))
            .collect();
        format!(
            r#"(module
              (memory (export "memory") 4)
              (func (export "alloc") (param $len i32) (result i32) (i32.const 4096))
              (func (export "parse") (param $ptr i32) (param $len i32) (result i64)
                {stores}
                (i64.or
                  (i64.shl (i64.extend_i32_u (i32.const 4096)) (i64.const 32))
                  (i64.extend_i32_u (i32.const {out_len}))))
            )"#,
            stores = stores,
            out_len = payload.len(),
        )
    }

    #[test]
    fn compile_rejects_denied_capability() {
        let host = PluginHost::new(SandboxLimits::default());
        let src = r#"(module (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32))))"#;
        let err = host.compile(src).unwrap_err();
        assert!(matches!(err, PluginHostError::SecurityViolation(_)));
    }

    #[test]
    fn compile_rejects_malformed_source() {
        let host = PluginHost::new(SandboxLimits::default());
        let err = host.compile("(module (func $x").unwrap_err();
        assert!(matches!(err, PluginHostError::CompilationError(_)));
    }

    #[test]
    fn load_execute_unload_round_trip() {
        let host = PluginHost::new(SandboxLimits::default());
        let artifact = host.compile(&echo_one_event_wat()).unwrap();
        let id = Uuid::new_v4();
        let handle = host.load(id, artifact);

        let result = host.execute(handle, b"anything").unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].message, "hello");

        assert!(host.unload(id));
        assert!(matches!(
            host.execute(handle, b"anything"),
            Err(PluginHostError::UnknownHandle(_))
        ));
    }

    #[test]
    fn reload_replaces_entry() {
        let host = PluginHost::new(SandboxLimits::default());
        let id = Uuid::new_v4();
        let a1 = host.compile(&echo_one_event_wat()).unwrap();
        host.load(id, a1);
        let a2 = host.compile(&echo_one_event_wat()).unwrap();
        let handle = host.load(id, a2);
        assert!(host.execute(handle, b"x").is_ok());
    }

    #[test]
    fn benchmark_reports_stats() {
        let host = PluginHost::new(SandboxLimits::default());
        let artifact = host.compile(&echo_one_event_wat()).unwrap();
        let handle = host.load(Uuid::new_v4(), artifact);
        let stats = host.benchmark(handle, b"x", 5).unwrap();
        assert_eq!(stats.iterations, 5);
        assert!(stats.min_ms <= stats.mean_ms);
        assert!(stats.mean_ms <= stats.max_ms);
    }

    #[test]
    fn sandbox_timeout_is_surfaced_as_violation() {
        let mut limits = SandboxLimits::default();
        limits.max_wall_clock_ms = 50;
        let host = PluginHost::new(limits);
        let spin_wat = r#"(module
            (memory (export "memory") 1)
            (func (export "alloc") (param $len i32) (result i32) (i32.const 0))
            (func (export "parse") (param $ptr i32) (param $len i32) (result i64)
              (loop $loop (br $loop))
              (i64.const 0))
        )"#;
        let artifact = host.compile(spin_wat).unwrap();
        let handle = host.load(Uuid::new_v4(), artifact);
        let err = host.execute(handle, b"x").unwrap_err();
        assert!(matches!(
            err,
            PluginHostError::SandboxViolation(SandboxViolation::Timeout { .. })
        ));
    }
}
