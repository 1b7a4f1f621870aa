//! Backend profiles
//!
//! Everything that differs between debugger backends besides the wire
//! protocol: where to find the adapter, which frames belong to the C
//! runtime, and how each backend spells an unavailable value.

use crate::trace::Sentinels;

/// Frames that belong to process startup on glibc and the MSVC CRT
const RUNTIME_STARTUP_FRAMES: &[&str] = &[
    "__libc_start_call_main",
    "__libc_start_main",
    "_start",
    "mainCRTStartup",
    "__tmainCRTStartup",
    "__scrt_common_main_seh",
    "invoke_main",
];

/// Static description of a debugger backend
#[derive(Debug)]
pub struct BackendProfile {
    /// Unique identifier (e.g., "lldb", "gdb")
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Adapter executables to look for, in order
    pub adapter_candidates: &'static [&'static str],
    /// Arguments passed to the adapter
    pub adapter_args: &'static [&'static str],
    /// Function names at and below the program entry point
    pub frames_below_main: &'static [&'static str],
    pub sentinels: Sentinels,
    /// Substring the backend puts in the name of inlined frames
    pub inline_marker: Option<&'static str>,
    /// Function the program is stopped in before the first step
    pub entry_function: &'static str,
    /// Brief description
    pub description: &'static str,
}

static BACKENDS: &[BackendProfile] = &[
    BackendProfile {
        id: "lldb",
        name: "lldb-dap",
        adapter_candidates: &["lldb-dap", "lldb-vscode"],
        adapter_args: &[],
        frames_below_main: RUNTIME_STARTUP_FRAMES,
        sentinels: Sentinels {
            optimized_away: &["<variable not available>", "<optimized out>"],
            irretrievable: &["<unavailable>", "error: Couldn't read", "memory read failed"],
        },
        inline_marker: Some("[inlined]"),
        entry_function: "main",
        description: "LLVM's native DAP adapter",
    },
    BackendProfile {
        id: "gdb",
        name: "GDB",
        adapter_candidates: &["gdb"],
        adapter_args: &["-q", "-i=dap"],
        frames_below_main: RUNTIME_STARTUP_FRAMES,
        sentinels: Sentinels {
            optimized_away: &["<optimized out>"],
            irretrievable: &["<unavailable>", "Cannot access memory", "<error:"],
        },
        inline_marker: None,
        entry_function: "main",
        description: "GDB native DAP interpreter (GDB 14+)",
    },
    BackendProfile {
        id: "codelldb",
        name: "CodeLLDB",
        adapter_candidates: &["codelldb"],
        adapter_args: &[],
        frames_below_main: RUNTIME_STARTUP_FRAMES,
        sentinels: Sentinels {
            optimized_away: &["<variable not available>", "<optimized out>"],
            irretrievable: &["<unavailable>", "<not available>", "error: Couldn't read"],
        },
        inline_marker: Some("[inlined]"),
        entry_function: "main",
        description: "LLDB-based adapter from the CodeLLDB extension",
    },
];

/// Get all registered backends
pub fn all_backends() -> &'static [BackendProfile] {
    BACKENDS
}

/// Get a backend profile by ID
pub fn get_backend(id: &str) -> Option<&'static BackendProfile> {
    BACKENDS.iter().find(|b| b.id == id)
}

/// Comma separated list of backend IDs, for error messages
pub fn known_names() -> String {
    BACKENDS
        .iter()
        .map(|b| b.id)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(get_backend("lldb").map(|b| b.name), Some("lldb-dap"));
        assert!(get_backend("vs2017").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<_> = all_backends().iter().map(|b| b.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all_backends().len());
    }

    #[test]
    fn test_every_backend_trims_crt_startup() {
        for backend in all_backends() {
            assert!(backend.frames_below_main.contains(&"mainCRTStartup"));
            assert!(backend.frames_below_main.contains(&"__libc_start_main"));
            assert!(!backend.adapter_candidates.is_empty());
        }
    }

    #[test]
    fn test_known_names() {
        assert_eq!(known_names(), "lldb, gdb, codelldb");
    }
}
