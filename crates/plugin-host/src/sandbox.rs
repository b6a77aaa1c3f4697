//! Per-execution sandbox: caps, epoch-based wall-clock enforcement, and
//! the guest ABI used to hand raw bytes in and an event list back out
//! (spec §4.B "Sandbox contract").

use std::time::{Duration, Instant};

use wasmtime::{Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder};

use crate::error::{PluginHostError, SandboxViolation};

/// Per-execution resource caps (spec §4.B defaults).
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub max_memory_mib: u64,
    pub max_wall_clock_ms: u64,
    /// CPU share and thread count are enforced by the host's executor
    /// pool rather than inside the guest: a wasm module is
    /// single-threaded by construction, so there is nothing inside the
    /// sandbox itself to cap beyond memory and wall-clock.
    pub max_cpu_percent: u8,
    pub max_threads: u8,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_memory_mib: 100,
            max_wall_clock_ms: 30_000,
            max_cpu_percent: 50,
            max_threads: 10,
        }
    }
}

pub struct StoreState {
    limits: StoreLimits,
}

impl StoreState {
    fn new(limits: &SandboxLimits) -> Self {
        Self {
            limits: StoreLimitsBuilder::new()
                .memory_size((limits.max_memory_mib as usize) * 1024 * 1024)
                .build(),
        }
    }
}

/// Runs `raw` through the compiled guest module's `alloc`/`parse` export
/// pair and returns the raw UTF-8 bytes the guest produced. Enforces the
/// wall-clock cap via epoch interruption and the memory cap via
/// `StoreLimits`; either violation surfaces as a `SandboxViolation`
/// rather than a generic trap.
pub fn run_guest(
    engine: &Engine,
    module: &Module,
    raw: &[u8],
    limits: &SandboxLimits,
) -> Result<Vec<u8>, PluginHostError> {
    let mut store = Store::new(engine, StoreState::new(limits));
    store.limiter(|state| &mut state.limits);
    store.set_epoch_deadline(1);

    let deadline = Duration::from_millis(limits.max_wall_clock_ms);
    let ticker_engine = engine.clone();
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let ticker = std::thread::spawn(move || {
        if rx.recv_timeout(deadline).is_err() {
            ticker_engine.increment_epoch();
        }
    });

    let linker: Linker<StoreState> = Linker::new(engine);
    let started = Instant::now();
    let classify = |e: anyhow::Error| classify_trap(e, started, deadline, limits.max_memory_mib);
    let result = (|| -> Result<Vec<u8>, PluginHostError> {
        let instance = linker.instantiate(&mut store, module).map_err(classify)?;

        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| PluginHostError::GuestTrap(e.to_string()))?;
        let parse = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "parse")
            .map_err(|e| PluginHostError::GuestTrap(e.to_string()))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| PluginHostError::GuestTrap("guest does not export memory".into()))?;

        let in_ptr = alloc.call(&mut store, raw.len() as i32).map_err(classify)?;
        memory
            .write(&mut store, in_ptr as usize, raw)
            .map_err(|e| PluginHostError::GuestTrap(e.to_string()))?;

        let packed = parse
            .call(&mut store, (in_ptr, raw.len() as i32))
            .map_err(classify)?;
        let out_ptr = (packed >> 32) as u32 as usize;
        let out_len = (packed & 0xffff_ffff) as u32 as usize;

        let mut out = vec![0u8; out_len];
        memory
            .read(&store, out_ptr, &mut out)
            .map_err(|e| PluginHostError::GuestTrap(e.to_string()))?;
        Ok(out)
    })();

    let _ = tx.send(());
    let _ = ticker.join();
    result
}

fn classify_trap(
    err: anyhow::Error,
    started: Instant,
    deadline: Duration,
    limit_mib: u64,
) -> PluginHostError {
    let msg = err.to_string().to_lowercase();
    if msg.contains("resource limit exceeded") || (msg.contains("memory") && msg.contains("limit")) {
        return PluginHostError::SandboxViolation(SandboxViolation::ResourceExhausted { limit_mib });
    }
    if msg.contains("epoch") || msg.contains("interrupt") || started.elapsed() >= deadline {
        return PluginHostError::SandboxViolation(SandboxViolation::Timeout {
            limit_ms: deadline.as_millis() as u64,
        });
    }
    PluginHostError::GuestTrap(err.to_string())
}
