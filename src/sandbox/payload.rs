//! Options handed from the parent to the sandbox child

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::common::{paths, Error, Result};
use crate::driver::DriverConfig;

/// Current version of the options payload
pub const OPTIONS_SCHEMA_VERSION: u32 = 1;

/// On/off switch for the test-harness modes carried through a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HarnessToggle {
    #[default]
    Off,
    On,
}

impl HarnessToggle {
    pub fn is_on(self) -> bool {
        self == HarnessToggle::On
    }
}

impl fmt::Display for HarnessToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
        }
    }
}

/// Snapshot of the invocation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    pub debugger: String,
    pub executable: PathBuf,
    /// Arguments for the debuggee
    pub args: Vec<String>,
    pub adapter_path: Option<PathBuf>,
    pub show_debugger: bool,
    pub debugger_version: Option<String>,
    pub working_directory: PathBuf,
    pub lint: HarnessToggle,
    pub unittest: HarnessToggle,
    pub trace_path: PathBuf,
    pub verbose: bool,
    pub time_report: bool,
    /// Overall limit for the sandbox process
    pub timeout_secs: Option<u64>,
}

impl RunOptions {
    /// Overlay the fields the child receives on its command line
    pub fn merge_live(&mut self, live: LiveOptions) {
        self.working_directory = live.working_directory;
        self.lint = live.lint;
        self.unittest = live.unittest;
        self.trace_path = live.trace_path;
    }

    /// Fields that travel on the child's command line
    pub fn live(&self) -> LiveOptions {
        LiveOptions {
            working_directory: self.working_directory.clone(),
            lint: self.lint,
            unittest: self.unittest,
            trace_path: self.trace_path.clone(),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            debugger: self.debugger.clone(),
            executable: self.executable.clone(),
            args: self.args.clone(),
            adapter_path: self.adapter_path.clone(),
            show_debugger: self.show_debugger,
            version_hint: self.debugger_version.clone(),
            working_directory: Some(self.working_directory.clone()),
        }
    }
}

/// Options that may change between writing the snapshot and running the
/// child, and therefore win over the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveOptions {
    pub working_directory: PathBuf,
    pub lint: HarnessToggle,
    pub unittest: HarnessToggle,
    pub trace_path: PathBuf,
}

/// Versioned wrapper written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsPayload {
    pub schema_version: u32,
    pub options: RunOptions,
}

impl OptionsPayload {
    pub fn new(options: RunOptions) -> Self {
        Self {
            schema_version: OPTIONS_SCHEMA_VERSION,
            options,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a payload, refusing one written by a different version
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let found = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::Config("options payload has no schema_version".to_string()))?;
        if found != OPTIONS_SCHEMA_VERSION as u64 {
            return Err(Error::schema_mismatch(
                "options",
                u32::try_from(found).unwrap_or(u32::MAX),
                OPTIONS_SCHEMA_VERSION,
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        paths::write_atomic(path, self.to_json()?.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            debugger: "lldb".to_string(),
            executable: PathBuf::from("/build/a.out"),
            args: vec!["--fast".to_string()],
            adapter_path: None,
            show_debugger: false,
            debugger_version: Some("17".to_string()),
            working_directory: PathBuf::from("/snapshot"),
            lint: HarnessToggle::Off,
            unittest: HarnessToggle::Off,
            trace_path: PathBuf::from("/snapshot/steptrace.json"),
            verbose: true,
            time_report: false,
            timeout_secs: Some(30),
        }
    }

    #[test]
    fn test_live_fields_win() {
        let mut opts = options();
        opts.merge_live(LiveOptions {
            working_directory: PathBuf::from("/live"),
            lint: HarnessToggle::On,
            unittest: HarnessToggle::On,
            trace_path: PathBuf::from("/live/t.json"),
        });
        assert_eq!(opts.working_directory, PathBuf::from("/live"));
        assert!(opts.lint.is_on() && opts.unittest.is_on());
        assert_eq!(opts.trace_path, PathBuf::from("/live/t.json"));
        // Snapshot-only fields are untouched
        assert_eq!(opts.debugger_version.as_deref(), Some("17"));
        assert!(opts.verbose);
    }

    #[test]
    fn test_driver_config_carries_version_hint() {
        let cfg = options().driver_config();
        assert_eq!(cfg.version_hint.as_deref(), Some("17"));
        assert_eq!(cfg.working_directory, Some(PathBuf::from("/snapshot")));
        assert_eq!(cfg.args, vec!["--fast"]);
    }

    #[test]
    fn test_payload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        let payload = OptionsPayload::new(options());
        payload.save(&path).unwrap();
        assert_eq!(OptionsPayload::load(&path).unwrap(), payload);
    }

    #[test]
    fn test_payload_version_mismatch() {
        let json = OptionsPayload::new(options())
            .to_json()
            .unwrap()
            .replacen("\"schema_version\": 1", "\"schema_version\": 2", 1);
        assert!(matches!(
            OptionsPayload::from_json(&json),
            Err(Error::SchemaMismatch { found: 2, expected: 1, .. })
        ));
    }
}
