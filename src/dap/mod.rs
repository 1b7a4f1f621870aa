//! Debug Adapter Protocol (DAP) implementation
//!
//! The client side of DAP, used by the driver to talk to debug adapters
//! like lldb-dap or gdb's built-in DAP interpreter.

pub mod client;
pub mod codec;
pub mod types;

pub use client::{DapClient, PendingResponse};
pub use types::*;
