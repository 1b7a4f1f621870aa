//! Source positions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A source position as reported by the debugger.
///
/// Every field may be absent when the backend cannot resolve one. A column is
/// only meaningful with a line, so a location never has a column without a
/// line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    pub path: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Location {
    /// Build a location, dropping a column that has no line
    pub fn new(path: Option<PathBuf>, line: Option<u32>, column: Option<u32>) -> Self {
        Self {
            path,
            column: line.and(column),
            line,
        }
    }

    /// A location with no information at all
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Shorthand for a `path:line` location
    pub fn at(path: impl AsRef<Path>, line: u32) -> Self {
        Self::new(Some(path.as_ref().to_path_buf()), Some(line), None)
    }

    pub fn is_unknown(&self) -> bool {
        self.path.is_none() && self.line.is_none() && self.column.is_none()
    }

    /// Whether the location satisfies the line/column invariant
    pub fn is_consistent(&self) -> bool {
        self.line.is_some() || self.column.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}", path.display())?,
            None => write!(f, "<unknown>")?,
        }
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}
