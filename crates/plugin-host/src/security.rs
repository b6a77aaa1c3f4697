//! Static security scan run on parser source before it is ever
//! instantiated (spec §4.B "Security scan").

use crate::error::PluginHostError;

/// 10 MiB cap on both source text and compiled module bytes.
pub const MAX_ARTIFACT_BYTES: usize = 10 * 1024 * 1024;

/// Capability tokens that, if present anywhere in the source, fail the
/// scan outright: process creation, filesystem, network, raw memory
/// syscalls, reflection-like dynamic loading, and FFI escape hatches.
const DENY_TOKENS: &[&str] = &[
    "fd_write", "fd_read", "fd_close", "fd_seek",
    "path_open", "path_create_directory", "path_unlink_file", "path_rename",
    "sock_open", "sock_connect", "sock_listen", "sock_accept", "sock_send", "sock_recv",
    "proc_exit", "proc_spawn", "proc_raise",
    "dlopen", "dlsym", "loadlibrary", "getprocaddress",
    "random_get", "environ_get", "args_get", "clock_time_get",
    "memory.grow",
];

/// The only import module a parser is allowed to declare. Everything the
/// host exposes to a guest lives behind this namespace; no other import
/// module name is a "standard-library module" within this sandbox.
const ALLOWED_IMPORT_MODULES: &[&str] = &["host_stdlib"];

/// Textual pre-check on the WAT/WASM source (spec §4.B): deny-list scan,
/// size cap, and import allow-list. Runs before `wasmtime` ever sees the
/// module.
pub fn scan_source(source: &str) -> Result<(), PluginHostError> {
    if source.len() > MAX_ARTIFACT_BYTES {
        return Err(PluginHostError::SecurityViolation(format!(
            "source exceeds {MAX_ARTIFACT_BYTES} byte cap"
        )));
    }

    let lower = source.to_lowercase();
    for token in DENY_TOKENS {
        if lower.contains(token) {
            return Err(PluginHostError::SecurityViolation(format!(
                "source references denied capability token \"{token}\""
            )));
        }
    }

    for import_module in find_import_modules(source) {
        if !ALLOWED_IMPORT_MODULES.contains(&import_module.as_str()) {
            return Err(PluginHostError::SecurityViolation(format!(
                "source imports disallowed module \"{import_module}\""
            )));
        }
    }

    Ok(())
}

/// Size cap on the already-compiled module bytes (spec §4.B "reject
/// assemblies/artifacts larger than 10 MiB").
pub fn scan_compiled_size(bytes: &[u8]) -> Result<(), PluginHostError> {
    if bytes.len() > MAX_ARTIFACT_BYTES {
        return Err(PluginHostError::SecurityViolation(format!(
            "compiled artifact exceeds {MAX_ARTIFACT_BYTES} byte cap"
        )));
    }
    Ok(())
}

/// Extracts `(import "module" "name" ...)` module names from WAT text.
/// A small hand-rolled scan rather than a full WAT parser: the security
/// scan only needs the module identifier, and `wat::parse_str` will
/// reject anything else malformed later at compile time.
fn find_import_modules(source: &str) -> Vec<String> {
    let mut modules = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("(import") {
        rest = &rest[pos + "(import".len()..];
        let Some(module) = next_quoted(rest) else { continue };
        modules.push(module);
    }
    modules
}

fn next_quoted(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let end = start + text[start..].find('"')?;
    Some(text[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_filesystem_capability() {
        let src = r#"(module (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32))))"#;
        assert!(scan_source(src).is_err());
    }

    #[test]
    fn denies_non_allowlisted_import_module() {
        let src = r#"(module (import "env" "memcpy" (func (param i32 i32 i32))))"#;
        assert!(scan_source(src).is_err());
    }

    #[test]
    fn allows_host_stdlib_import() {
        let src = r#"(module (import "host_stdlib" "abort" (func (param i32))))"#;
        assert!(scan_source(src).is_ok());
    }

    #[test]
    fn allows_import_free_module() {
        let src = r#"(module (memory (export "memory") 1))"#;
        assert!(scan_source(src).is_ok());
    }

    #[test]
    fn rejects_oversized_source() {
        let src = "x".repeat(MAX_ARTIFACT_BYTES + 1);
        assert!(scan_source(&src).is_err());
    }
}
