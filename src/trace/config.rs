//! Run configuration carried inside a trace

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::common::{Error, Result};

/// How the engine advances between stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepMode {
    /// Single source-level steps (step into)
    #[default]
    Step,
    /// Run freely to the next breakpoint
    Go,
}

/// A source breakpoint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakpointSpec {
    pub path: PathBuf,
    pub line: u32,
}

impl BreakpointSpec {
    pub fn new(path: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }

    /// Parse a `file:line` string
    pub fn parse(s: &str) -> Result<Self> {
        // Windows paths like "C:\path\file.c:10" contain more than one ':',
        // so only the last one separates the line number
        let (file_part, line_str) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidLocation(format!("expected file:line, got '{}'", s)))?;

        if file_part.is_empty() {
            return Err(Error::InvalidLocation(format!("missing file in '{}'", s)));
        }
        if line_str.is_empty() || !line_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidLocation(format!(
                "invalid line number: {}",
                line_str
            )));
        }

        let line: u32 = line_str
            .parse()
            .map_err(|_| Error::InvalidLocation(format!("invalid line number: {}", line_str)))?;
        if line == 0 {
            return Err(Error::InvalidLocation("line numbers start at 1".to_string()));
        }

        Ok(Self::new(file_part, line))
    }
}

impl fmt::Display for BreakpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// What to run and how to step through it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub executable: PathBuf,
    /// Source files of interest to downstream consumers
    pub source_paths: Vec<PathBuf>,
    pub breakpoints: Vec<BreakpointSpec>,
    /// Expressions evaluated at every step
    pub watches: Vec<String>,
    pub mode: StepMode,
    /// Stop after this many steps have been recorded in this run
    pub step_limit: Option<u64>,
    pub first_step_index: u64,
}

impl RunConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            source_paths: Vec::new(),
            breakpoints: Vec::new(),
            watches: Vec::new(),
            mode: StepMode::Step,
            step_limit: None,
            first_step_index: 0,
        }
    }
}
