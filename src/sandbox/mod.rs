//! Sandboxed debugger runs
//!
//! The debugger runs in a child process started from the same binary. The
//! two sides share nothing but a trace file and an options file, so a
//! backend that hangs or crashes takes only the child down with it.

mod child;
mod parent;
mod payload;

pub use child::run_debugger_internal;
pub use parent::{SandboxReport, SandboxRunner, INTERNAL_COMMAND, LOAD_FAILURE_EXIT_CODE};
pub use payload::{HarnessToggle, LiveOptions, OptionsPayload, RunOptions, OPTIONS_SCHEMA_VERSION};
