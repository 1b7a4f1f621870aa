//! Trace data model
//!
//! The serializable record of a debugging session: steps, frames, locations
//! and evaluated expressions, plus the run configuration that produced them.
//! A trace is the only artifact that crosses the sandbox boundary.

mod config;
mod location;
mod model;
mod step;
mod value;

pub use config::{BreakpointSpec, RunConfig, StepMode};
pub use location::Location;
pub use model::{DebuggerInfo, FailureKind, Trace, TraceFailure, SCHEMA_VERSION};
pub use step::{Frame, Step, StopReason};
pub use value::{EvaluatedExpression, Sentinels};
