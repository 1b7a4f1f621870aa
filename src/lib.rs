//! steptrace - drive debugger backends and record step traces
//!
//! A debugger backend is driven one step at a time through the Debug Adapter
//! Protocol. At every stop the call stack, location and watch expressions are
//! recorded into a [`trace::Trace`]. Runs happen in a sandbox child process so
//! a misbehaving backend cannot take the caller down.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod driver;
pub mod engine;
pub mod sandbox;
pub mod trace;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use trace::{Step, StopReason, Trace};
