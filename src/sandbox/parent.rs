//! Parent side of the sandbox: spawn the child and collect its trace

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};

use crate::common::{Error, Result};
use crate::trace::{FailureKind, Trace};

use super::payload::{OptionsPayload, RunOptions};

/// Subcommand the child is started with
pub const INTERNAL_COMMAND: &str = "run-debugger-internal";

/// Exit status of a child whose debugger could not be loaded
pub const LOAD_FAILURE_EXIT_CODE: i32 = 2;

/// How long a timed-out child gets to tear down after SIGTERM
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long to keep reading stderr after the child is gone. An adapter that
/// inherited the pipe can hold it open.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// What came back from one sandboxed run
#[derive(Debug)]
pub struct SandboxReport {
    pub trace: Trace,
    /// `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    /// Everything the child wrote to stderr
    pub stderr: String,
}

impl SandboxReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.trace.is_failed()
    }
}

/// Runs the debugger in a separate process
pub struct SandboxRunner {
    program: PathBuf,
    timeout: Duration,
    grace: Duration,
}

impl SandboxRunner {
    /// Runner that re-executes the current binary
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_program(std::env::current_exe()?, timeout))
    }

    pub fn with_program(program: PathBuf, timeout: Duration) -> Self {
        Self {
            program,
            timeout,
            grace: TEARDOWN_GRACE,
        }
    }

    /// Time between SIGTERM and SIGKILL for a child that overran its timeout
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Persist `trace`, run the child on it and read the result back.
    ///
    /// A child that fails without annotating the trace gets a sandbox crash
    /// annotation in the returned trace; the file itself is left as the
    /// child wrote it.
    #[tracing::instrument(skip_all, fields(debugger = %options.debugger))]
    pub async fn run(&self, trace: &Trace, options: &RunOptions) -> Result<SandboxReport> {
        trace.save(&options.trace_path)?;

        let scratch = tempfile::tempdir()?;
        let options_path = scratch.path().join("options.json");
        OptionsPayload::new(options.clone()).save(&options_path)?;

        let live = options.live();
        let mut cmd = Command::new(&self.program);
        cmd.arg(INTERNAL_COMMAND)
            .arg(&live.trace_path)
            .arg(&options_path)
            .arg("--working-directory")
            .arg(&live.working_directory)
            .arg("--lint")
            .arg(live.lint.to_string())
            .arg("--unittest")
            .arg(live.unittest.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::SandboxCrash(format!("could not start {}: {}", self.program.display(), e)))?;
        tracing::debug!(pid = ?child.id(), "Sandbox spawned");

        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, Arc::clone(&stderr_buf))));

        let (status, timed_out) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Sandbox timed out, asking it to stop");
                (self.stop(&mut child).await, true)
            }
        };

        if let Some(reader) = reader {
            if tokio::time::timeout(STDERR_DRAIN, reader).await.is_err() {
                tracing::debug!("Stopped reading sandbox stderr");
            }
        }
        let stderr = stderr_buf
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default();

        let mut trace = Trace::load(&options.trace_path)?;
        let failed = status.map_or(true, |s| !s.success());
        if failed && !trace.is_failed() {
            let code = status.and_then(|s| s.code());
            if code == Some(LOAD_FAILURE_EXIT_CODE) && !timed_out {
                let (message, diagnostic) = load_failure(&stderr);
                trace.record_failure(FailureKind::Load, message, diagnostic);
            } else {
                let message = match status {
                    Some(status) if !timed_out => describe_status(&status),
                    _ => format!("timed out after {} seconds", self.timeout.as_secs()),
                };
                trace.record_failure(
                    FailureKind::SandboxCrash,
                    message,
                    stderr.lines().map(str::to_string).collect(),
                );
            }
        }

        Ok(SandboxReport {
            trace,
            exit_code: status.and_then(|s| s.code()),
            stderr,
        })
    }

    /// SIGTERM, then SIGKILL once the grace period is over. Returns the
    /// exit status when the child could be reaped.
    async fn stop(&self, child: &mut Child) -> Option<ExitStatus> {
        if request_shutdown(child) {
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(Ok(status)) => return Some(status),
                Ok(Err(e)) => tracing::warn!(error = %e, "Waiting for the sandbox failed"),
                Err(_) => tracing::warn!(
                    grace_secs = self.grace.as_secs_f64(),
                    "Sandbox ignored SIGTERM, killing it"
                ),
            }
        }
        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "Could not kill the sandbox");
        }
        match child.wait().await {
            Ok(status) => Some(status),
            Err(_) => None,
        }
    }
}

async fn collect_stderr(mut stderr: ChildStderr, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut buf) = buf.lock() {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

/// Ask the child to run its own teardown
#[cfg(unix)]
fn request_shutdown(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: kill(2) on the pid of a child we have not reaped yet
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_shutdown(_child: &Child) -> bool {
    false
}

/// Message and context of a load failure from the child's stderr.
///
/// The child prints `Error: <message>` followed by indented context lines.
fn load_failure(stderr: &str) -> (String, Vec<String>) {
    let mut message = None;
    let mut diagnostic = Vec::new();
    for line in stderr.lines() {
        match line.strip_prefix("Error: ") {
            Some(text) if message.is_none() => message = Some(text.to_string()),
            _ if message.is_some() && line.starts_with("  ") => {
                diagnostic.push(line.trim().to_string())
            }
            _ => {}
        }
    }
    (
        message.unwrap_or_else(|| "could not load the debugger".to_string()),
        diagnostic,
    )
}

fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("sandbox exited with status {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("sandbox killed by signal {}", signal);
        }
    }
    "sandbox terminated abnormally".to_string()
}
