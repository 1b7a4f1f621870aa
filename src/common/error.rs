//! Error types for steptrace
//!
//! Messages are written to be surfaced verbatim by the orchestrating process,
//! which only sees the sandbox's stderr and exit code.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for steptrace
#[derive(Error, Debug)]
pub enum Error {
    // === Driver Errors ===
    #[error("{0}")]
    Load(LoadFailure),

    #[error("Debugger operation '{operation}' failed: {message}")]
    DriverOperation { operation: String, message: String },

    #[error("Debug adapter crashed unexpectedly")]
    AdapterCrashed,

    #[error("Unknown debugger '{name}' (choose from {known})")]
    UnknownDebugger { name: String, known: String },

    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    // === Sandbox Errors ===
    #[error("Sandbox process failed: {0}")]
    SandboxCrash(String),

    #[error("Run interrupted before completion")]
    Interrupted,

    #[error("Run failed after {steps} steps: {message}")]
    RunFailed { steps: usize, message: String },

    // === Trace / Payload Errors ===
    #[error("Schema mismatch in {payload}: found version {found}, expected {expected}")]
    SchemaMismatch {
        payload: String,
        found: u32,
        expected: u32,
    },

    #[error("Invalid trace: {0}")]
    InvalidTrace(String),

    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    // === Timeout Errors ===
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Wrap any failure of a running session as a driver operation failure
    pub fn driver_op(operation: &str, error: impl fmt::Display) -> Self {
        Self::DriverOperation {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(payload: &str, found: u32, expected: u32) -> Self {
        Self::SchemaMismatch {
            payload: payload.to_string(),
            found,
            expected,
        }
    }
}

/// A backend could not be located, constructed or attached.
///
/// Carries the original diagnostic plus the context that was gathered while
/// trying, so the sandbox can report it without the caller crashing.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    /// Requested debugger name
    pub debugger: String,
    /// Original diagnostic text
    pub message: String,
    /// Captured context, outermost first
    pub trace: Vec<String>,
}

impl LoadFailure {
    pub fn new(debugger: &str, message: impl Into<String>) -> Self {
        Self {
            debugger: debugger.to_string(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Build a load failure from an error, capturing its source chain
    pub fn from_error(debugger: &str, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut failure = Self::new(debugger, error.to_string());
        let mut source = error.source();
        while let Some(cause) = source {
            failure.trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        failure
    }

    /// Append a line of context
    pub fn with_context(mut self, line: impl Into<String>) -> Self {
        self.trace.push(line.into());
        self
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not load {} ({})", self.debugger, self.message)
    }
}

impl From<LoadFailure> for Error {
    fn from(failure: LoadFailure) -> Self {
        Error::Load(failure)
    }
}
