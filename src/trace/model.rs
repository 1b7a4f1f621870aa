//! The trace document

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::common::{paths, Error, Result};

use super::{RunConfig, Step};

/// Current version of the trace schema
pub const SCHEMA_VERSION: u32 = 1;

/// Identity of the backend that produced a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerInfo {
    pub name: String,
    pub version: Option<String>,
}

/// What ended a run early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Load,
    DriverOperation,
    Interrupted,
    SandboxCrash,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load failure"),
            Self::DriverOperation => write!(f, "debugger operation failure"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::SandboxCrash => write!(f, "sandbox crash"),
        }
    }
}

/// Terminal failure annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceFailure {
    pub kind: FailureKind,
    pub message: String,
    pub diagnostic: Vec<String>,
}

/// Ordered record of one debugging session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trace {
    pub schema_version: u32,
    pub debugger: Option<DebuggerInfo>,
    pub config: RunConfig,
    pub steps: Vec<Step>,
    pub failure: Option<TraceFailure>,
}

impl Trace {
    /// An empty trace for the given run configuration
    pub fn new(config: RunConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            debugger: None,
            config,
            steps: Vec::new(),
            failure: None,
        }
    }

    /// Index the next appended step must carry
    pub fn next_step_index(&self) -> u64 {
        self.config.first_step_index + self.steps.len() as u64
    }

    /// Append a step; earlier steps are never revised
    pub fn push_step(&mut self, step: Step) -> Result<()> {
        let expected = self.next_step_index();
        if step.step_index != expected {
            return Err(Error::InvalidTrace(format!(
                "step index {} appended where {} was expected",
                step.step_index, expected
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Annotate the trace with a terminal failure. The first failure wins.
    pub fn record_failure(&mut self, kind: FailureKind, message: impl Into<String>, diagnostic: Vec<String>) {
        if self.failure.is_some() {
            return;
        }
        self.failure = Some(TraceFailure {
            kind,
            message: message.into(),
            diagnostic,
        });
    }

    /// Forget the failure of a previous attempt before resuming
    pub fn clear_failure(&mut self) {
        self.failure = None;
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Check the structural invariants of the trace
    pub fn validate(&self) -> Result<()> {
        for (offset, step) in self.steps.iter().enumerate() {
            let expected = self.config.first_step_index + offset as u64;
            if step.step_index != expected {
                return Err(Error::InvalidTrace(format!(
                    "step {} has index {}, expected {}",
                    offset, step.step_index, expected
                )));
            }
            for frame in &step.frames {
                if !frame.location.is_consistent() {
                    return Err(Error::InvalidTrace(format!(
                        "step {} has a frame location with a column but no line",
                        step.step_index
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to the canonical text form
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Parse the canonical text form, checking schema version and invariants
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let found = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::InvalidTrace("missing schema_version".to_string()))?;
        if found != SCHEMA_VERSION as u64 {
            return Err(Error::schema_mismatch(
                "trace",
                u32::try_from(found).unwrap_or(u32::MAX),
                SCHEMA_VERSION,
            ));
        }

        let trace: Trace = serde_json::from_value(value)?;
        trace.validate()?;
        Ok(trace)
    }

    /// Read a trace file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Write the trace file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        paths::write_atomic(path, json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{
        BreakpointSpec, EvaluatedExpression, Frame, Location, StepMode, StopReason,
    };

    fn frame(name: &str, location: Location) -> Frame {
        Frame {
            function: Some(name.to_string()),
            is_inlined: false,
            location,
        }
    }

    fn sample_trace() -> Trace {
        let mut config = RunConfig::new("/build/a.out");
        config.breakpoints.push(BreakpointSpec::new("a.cpp", 10));
        config.watches.push("x".to_string());
        config.mode = StepMode::Go;
        config.step_limit = Some(3);

        let mut trace = Trace::new(config);
        trace.debugger = Some(DebuggerInfo {
            name: "lldb".to_string(),
            version: None,
        });
        trace
            .push_step(Step {
                step_index: 0,
                frames: vec![
                    frame("foo", Location::at("a.cpp", 10)),
                    frame("main", Location::unknown()),
                ],
                stop_reason: StopReason::Breakpoint,
                watches: vec![EvaluatedExpression {
                    expression: "x".to_string(),
                    value: Some("1".to_string()),
                    type_name: Some("int".to_string()),
                    error: None,
                    could_evaluate: true,
                    is_optimized_away: false,
                    is_irretrievable: false,
                }],
            })
            .unwrap();
        trace
            .push_step(Step {
                step_index: 1,
                frames: vec![frame("foo", Location::new(None, None, None))],
                stop_reason: StopReason::Step,
                watches: Vec::new(),
            })
            .unwrap();
        trace.record_failure(
            FailureKind::DriverOperation,
            "adapter went away",
            vec!["caused by: broken pipe".to_string()],
        );
        trace
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let trace = sample_trace();
        let first = trace.to_json().unwrap();
        let reparsed = Trace::from_json(&first).unwrap();
        let second = reparsed.to_json().unwrap();
        assert_eq!(first, second);
        assert_eq!(reparsed, trace);
    }

    #[test]
    fn test_absent_fields_are_explicit_nulls() {
        let json = Trace::new(RunConfig::new("a.out")).to_json().unwrap();
        assert!(json.contains("\"debugger\": null"));
        assert!(json.contains("\"failure\": null"));
        assert!(json.contains("\"step_limit\": null"));

        let json = sample_trace().to_json().unwrap();
        assert!(json.contains("\"version\": null"));
        assert!(json.contains("\"column\": null"));
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let json = sample_trace().to_json().unwrap().replacen(
            "\"schema_version\": 1",
            "\"schema_version\": 7",
            1,
        );
        match Trace::from_json(&json) {
            Err(Error::SchemaMismatch { found, expected, .. }) => {
                assert_eq!(found, 7);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_schema_version_is_rejected() {
        assert!(matches!(
            Trace::from_json("{\"steps\": []}"),
            Err(Error::InvalidTrace(_))
        ));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let json = sample_trace()
            .to_json()
            .unwrap()
            .replacen("\"failure\":", "\"extra\": 1,\n  \"failure\":", 1);
        assert!(matches!(Trace::from_json(&json), Err(Error::Json(_))));
    }

    #[test]
    fn test_push_step_enforces_contiguous_indices() {
        let mut trace = Trace::new(RunConfig::new("a.out"));
        let step = |i| Step {
            step_index: i,
            frames: Vec::new(),
            stop_reason: StopReason::Step,
            watches: Vec::new(),
        };
        trace.push_step(step(0)).unwrap();
        assert!(trace.push_step(step(2)).is_err());
        trace.push_step(step(1)).unwrap();
        assert_eq!(trace.next_step_index(), 2);
    }

    #[test]
    fn test_configured_first_index() {
        let mut config = RunConfig::new("a.out");
        config.first_step_index = 5;
        let trace = Trace::new(config);
        assert_eq!(trace.next_step_index(), 5);
    }

    #[test]
    fn test_validate_rejects_gaps() {
        let mut trace = sample_trace();
        trace.steps[1].step_index = 4;
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_column_without_line() {
        let mut trace = sample_trace();
        trace.steps[0].frames[0].location.line = None;
        trace.steps[0].frames[0].location.column = Some(3);
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_first_failure_wins() {
        let mut trace = sample_trace();
        trace.record_failure(FailureKind::SandboxCrash, "later", Vec::new());
        let failure = trace.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::DriverOperation);
        assert_eq!(failure.message, "adapter went away");

        trace.clear_failure();
        assert!(!trace.is_failed());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let trace = sample_trace();
        trace.save(&path).unwrap();
        assert_eq!(Trace::load(&path).unwrap(), trace);
    }
}
