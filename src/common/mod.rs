//! Common utilities shared between the CLI and the sandbox child

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod paths;

pub use context::RunContext;
pub use error::{Error, LoadFailure, Result};
