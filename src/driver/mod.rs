//! Debugger drivers
//!
//! A [`Driver`] is the engine's only view of a debugger backend. Backends are
//! described by static profiles (see [`registry`]) and all of them are driven
//! over DAP by [`DapDriver`]; the trait is the seam for anything else.

mod dap;
pub mod registry;
mod session;

pub use dap::DapDriver;
pub use registry::BackendProfile;
pub use session::DriverSession;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::common::config::Config;
use crate::common::{LoadFailure, Result};
use crate::engine;
use crate::trace::{DebuggerInfo, EvaluatedExpression, Location, Step};

/// Coarse execution state of the debuggee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not launched yet
    Idle,
    Running,
    Stopped,
    Exited,
}

/// A stack frame as the backend reports it, before trimming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub name: String,
    pub is_inlined: bool,
}

impl RawFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_inlined: false,
        }
    }
}

/// Everything needed to select and start a backend
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub debugger: String,
    pub executable: PathBuf,
    /// Arguments for the debuggee
    pub args: Vec<String>,
    /// Explicit adapter executable, bypassing discovery
    pub adapter_path: Option<PathBuf>,
    /// Let the adapter's own output through to stderr
    pub show_debugger: bool,
    /// Preferred backend version, tried as an adapter name suffix
    pub version_hint: Option<String>,
    pub working_directory: Option<PathBuf>,
}

/// Capability interface of a debugger backend.
///
/// Calls are strictly sequential and a driver serves one session at a time.
/// Acquisition and release are normally paired by [`DriverSession`].
#[async_trait]
pub trait Driver: Send {
    /// Backend identifier, as recorded in the trace
    fn name(&self) -> &str;

    /// Backend version, when it could be determined
    fn version(&self) -> Option<String>;

    /// Function names at and below the program entry point
    fn frames_below_main(&self) -> &[&'static str];

    fn info(&self) -> DebuggerInfo {
        DebuggerInfo {
            name: self.name().to_string(),
            version: self.version(),
        }
    }

    /// Start the backend and attach it to the executable
    async fn acquire(&mut self) -> Result<()>;

    /// Tear the backend down. Safe to call on a partially acquired driver.
    async fn release(&mut self) -> Result<()>;

    /// Synchronous last-resort teardown
    fn abort(&mut self);

    async fn clear_breakpoints(&mut self) -> Result<()>;

    /// Add a source breakpoint; adding an existing one is a no-op
    async fn add_breakpoint(&mut self, path: &Path, line: u32) -> Result<()>;

    /// Begin execution. The debuggee stops before the first recorded step.
    async fn launch(&mut self) -> Result<()>;

    /// Single source-level step into
    async fn step(&mut self) -> Result<()>;

    /// Run to the next breakpoint or to exit
    async fn go(&mut self) -> Result<()>;

    async fn run_state(&mut self) -> Result<RunState>;

    async fn is_running(&mut self) -> Result<bool> {
        Ok(self.run_state().await? == RunState::Running)
    }

    async fn is_finished(&mut self) -> Result<bool> {
        Ok(self.run_state().await? == RunState::Exited)
    }

    /// Call stack of the stopped thread, innermost first
    async fn stack_frames(&mut self) -> Result<Vec<RawFrame>>;

    /// Where the debuggee is stopped
    async fn last_location(&mut self) -> Result<Location>;

    /// Snapshot the current stop as a step
    async fn get_step_info(&mut self, step_index: u64) -> Result<Step> {
        let frames = self.stack_frames().await?;
        let location = self.last_location().await?;
        Ok(engine::build_step(
            step_index,
            &frames,
            self.frames_below_main(),
            location,
        ))
    }

    /// Evaluate an expression in the innermost frame.
    ///
    /// An expression the backend cannot evaluate is reported in the result,
    /// only a broken connection is an error.
    async fn evaluate_expression(&mut self, expression: &str) -> Result<EvaluatedExpression>;
}

/// Where an adapter was found and how to start it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAdapter {
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// Construct the driver for `config.debugger`.
///
/// Nothing is started yet; that happens when the driver is acquired.
#[tracing::instrument(skip_all, fields(debugger = %config.debugger))]
pub fn load(config: &DriverConfig, settings: &Config) -> std::result::Result<Box<dyn Driver>, LoadFailure> {
    let profile = registry::get_backend(&config.debugger).ok_or_else(|| {
        LoadFailure::new(&config.debugger, "unknown debugger").with_context(format!(
            "available debuggers: {}",
            registry::known_names()
        ))
    })?;

    if !config.executable.is_file() {
        return Err(LoadFailure::new(
            profile.id,
            format!(
                "could not debug the specified executable '{}'",
                config.executable.display()
            ),
        ));
    }

    let adapter = resolve_adapter(profile, config, settings)?;
    tracing::debug!(adapter = %adapter.path.display(), "Resolved debug adapter");

    Ok(Box::new(DapDriver::new(
        profile,
        adapter,
        config.clone(),
        &settings.timeouts,
    )))
}

/// Find the adapter executable for a profile.
///
/// Order: explicit path, config file, version-suffixed names, plain names.
pub fn resolve_adapter(
    profile: &BackendProfile,
    config: &DriverConfig,
    settings: &Config,
) -> std::result::Result<ResolvedAdapter, LoadFailure> {
    let configured = settings.get_adapter(profile.id);
    let args = match &configured {
        Some(adapter) if !adapter.args.is_empty() => adapter.args.clone(),
        _ => profile.adapter_args.iter().map(|a| a.to_string()).collect(),
    };

    if let Some(path) = &config.adapter_path {
        if path.is_file() {
            return Ok(ResolvedAdapter {
                path: path.clone(),
                args,
            });
        }
        return Err(LoadFailure::new(
            profile.id,
            format!("debug adapter not found at {}", path.display()),
        ));
    }

    let mut searched = Vec::new();

    if let Some(adapter) = configured {
        if adapter.path.is_file() {
            return Ok(ResolvedAdapter {
                path: adapter.path,
                args,
            });
        }
        searched.push(format!("searched config file: {}", adapter.path.display()));
    }

    let mut names: Vec<String> = Vec::new();
    if let Some(hint) = &config.version_hint {
        names.extend(
            profile
                .adapter_candidates
                .iter()
                .map(|name| format!("{}-{}", name, hint)),
        );
    }
    names.extend(profile.adapter_candidates.iter().map(|n| n.to_string()));

    for name in &names {
        match which::which(name) {
            Ok(path) => return Ok(ResolvedAdapter { path, args }),
            Err(_) => searched.push(format!("searched PATH: {}", name)),
        }
    }

    let mut failure = LoadFailure::new(
        profile.id,
        format!("no {} adapter found", profile.name),
    );
    failure.trace = searched;
    Err(failure.with_context(format!(
        "set [adapters.{}] path in the config file or pass --adapter-path",
        profile.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(debugger: &str, executable: &Path) -> DriverConfig {
        DriverConfig {
            debugger: debugger.to_string(),
            executable: executable.to_path_buf(),
            args: Vec::new(),
            adapter_path: None,
            show_debugger: false,
            version_hint: None,
            working_directory: None,
        }
    }

    #[test]
    fn test_unknown_debugger_lists_known_ones() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("a.out");
        std::fs::write(&exe, b"").unwrap();

        let failure = load(&config("vs2015", &exe), &Config::default())
            .err()
            .unwrap();
        assert_eq!(failure.debugger, "vs2015");
        assert_eq!(failure.to_string(), "could not load vs2015 (unknown debugger)");
        assert!(failure.trace[0].contains("lldb, gdb, codelldb"));
    }

    #[test]
    fn test_missing_executable_fails_to_load() {
        let failure = load(
            &config("lldb", Path::new("/nonexistent/a.out")),
            &Config::default(),
        )
        .err()
        .unwrap();
        assert!(failure.message.contains("could not debug the specified executable"));
    }

    #[test]
    fn test_explicit_adapter_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = dir.path().join("my-adapter");
        std::fs::write(&adapter, b"").unwrap();

        let mut cfg = config("gdb", Path::new("a.out"));
        cfg.adapter_path = Some(adapter.clone());
        let profile = registry::get_backend("gdb").unwrap();
        let resolved = resolve_adapter(profile, &cfg, &Config::default()).unwrap();
        assert_eq!(resolved.path, adapter);
        assert_eq!(resolved.args, vec!["-q", "-i=dap"]);
    }

    #[test]
    fn test_configured_adapter_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = dir.path().join("lldb-dap-custom");
        std::fs::write(&adapter, b"").unwrap();

        let settings = Config::parse(&format!(
            "[adapters.lldb]\npath = {:?}\nargs = [\"--port-free\"]\n",
            adapter.display().to_string()
        ))
        .unwrap();
        let profile = registry::get_backend("lldb").unwrap();
        let resolved =
            resolve_adapter(profile, &config("lldb", Path::new("a.out")), &settings).unwrap();
        assert_eq!(resolved.path, adapter);
        assert_eq!(resolved.args, vec!["--port-free"]);
    }

    #[test]
    fn test_missing_explicit_adapter_is_load_failure() {
        let mut cfg = config("lldb", Path::new("a.out"));
        cfg.adapter_path = Some(PathBuf::from("/nonexistent/lldb-dap"));
        let profile = registry::get_backend("lldb").unwrap();
        let failure = resolve_adapter(profile, &cfg, &Config::default()).unwrap_err();
        assert!(failure.message.contains("/nonexistent/lldb-dap"));
    }

    #[test]
    fn test_search_records_version_suffixed_candidates() {
        let settings = Config::parse(
            "[adapters.codelldb]\npath = \"/nonexistent/codelldb\"\n",
        )
        .unwrap();
        let mut cfg = config("codelldb", Path::new("a.out"));
        cfg.version_hint = Some("zz-not-a-version".to_string());
        let profile = registry::get_backend("codelldb").unwrap();

        // codelldb-zz-not-a-version is certainly not on PATH; plain codelldb may be
        if let Err(failure) = resolve_adapter(profile, &cfg, &settings) {
            assert_eq!(failure.trace[0], "searched config file: /nonexistent/codelldb");
            assert_eq!(failure.trace[1], "searched PATH: codelldb-zz-not-a-version");
            assert_eq!(failure.trace[2], "searched PATH: codelldb");
        }
    }
}
