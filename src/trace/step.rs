//! Frames, stop reasons and steps

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{EvaluatedExpression, Location};

/// One entry in a call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Frame {
    pub function: Option<String>,
    pub is_inlined: bool,
    pub location: Location,
}

/// Why the debuggee stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Breakpoint,
    Step,
    ProgramExit,
    Error,
    Other,
}

impl StopReason {
    /// Classify a stop from the location the debugger reported.
    ///
    /// A location without a path means the debuggee stopped after a single
    /// step; any path means a breakpoint was hit.
    pub fn classify(location: &Location) -> Self {
        if location.path.is_none() {
            StopReason::Step
        } else {
            StopReason::Breakpoint
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakpoint => write!(f, "BREAKPOINT"),
            Self::Step => write!(f, "STEP"),
            Self::ProgramExit => write!(f, "PROGRAM_EXIT"),
            Self::Error => write!(f, "ERROR"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

/// The observable program state at one stepping event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub step_index: u64,
    /// Innermost first
    pub frames: Vec<Frame>,
    pub stop_reason: StopReason,
    /// Watch expressions evaluated at this step, in configuration order
    pub watches: Vec<EvaluatedExpression>,
}

impl Step {
    /// The innermost frame, if any frame was retained
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Location of the innermost frame, or an unknown location
    pub fn location(&self) -> Location {
        self.current_frame()
            .map(|frame| frame.location.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_without_path_is_step() {
        let loc = Location::new(None, Some(12), None);
        assert_eq!(StopReason::classify(&loc), StopReason::Step);
        assert_eq!(StopReason::classify(&Location::unknown()), StopReason::Step);
    }

    #[test]
    fn test_classify_with_path_is_breakpoint() {
        assert_eq!(
            StopReason::classify(&Location::at("a.cpp", 10)),
            StopReason::Breakpoint
        );
        let no_line = Location::new(Some("a.cpp".into()), None, None);
        assert_eq!(StopReason::classify(&no_line), StopReason::Breakpoint);
    }

    #[test]
    fn test_stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&StopReason::ProgramExit).unwrap(),
            "\"PROGRAM_EXIT\""
        );
        assert_eq!(StopReason::Breakpoint.to_string(), "BREAKPOINT");
    }
}
