//! The sandbox child (`run-debugger-internal`)
//!
//! Loads the driver, runs the engine and writes the trace back. Anything
//! the backend does to this process stays in this process.

use std::path::Path;

use crate::common::config::Config;
use crate::common::{Error, LoadFailure, Result, RunContext};
use crate::driver::{self, DriverSession};
use crate::engine::{EngineSettings, SteppingEngine};
use crate::trace::{FailureKind, Trace};

use super::payload::{LiveOptions, OptionsPayload};

/// Entry point of the child process.
///
/// Returns `Ok` only when the engine finished. A load failure leaves the
/// trace file untouched; every other outcome rewrites it.
pub async fn run_debugger_internal(
    trace_path: &Path,
    options_path: &Path,
    live: LiveOptions,
) -> Result<()> {
    let mut options = OptionsPayload::load(options_path)?.options;
    options.merge_live(live);
    let ctx = RunContext::new(options.time_report, options.verbose);
    tracing::debug!(
        working_directory = %options.working_directory.display(),
        lint = %options.lint,
        unittest = %options.unittest,
        "Sandbox started"
    );
    if options.lint.is_on() || options.unittest.is_on() {
        tracing::info!(lint = %options.lint, unittest = %options.unittest, "Harness modes enabled");
    }

    // Installed before anything is spawned so an early SIGTERM from the
    // parent still runs the teardown below
    let mut shutdown = ShutdownSignal::install();

    let settings = Config::load()?;
    let mut trace = Trace::load(trace_path)?;
    trace.clear_failure();

    let driver_config = options.driver_config();
    let mut driver = driver::load(&driver_config, &settings)
        .map_err(|failure| load_error(failure, ctx.verbose))?;
    let name = driver.name().to_string();

    let acquired = ctx
        .timer
        .time("loading debugger", async {
            tokio::select! {
                result = DriverSession::acquire(driver.as_mut()) => Some(result),
                signal = shutdown.recv() => {
                    tracing::warn!(signal, "Interrupted while loading the debugger");
                    None
                }
            }
        })
        .await;

    let mut session = match acquired {
        Some(Ok(session)) => session,
        Some(Err(Error::Load(failure))) => return Err(load_error(failure, ctx.verbose)),
        Some(Err(other)) => {
            return Err(load_error(LoadFailure::from_error(&name, &other), ctx.verbose))
        }
        None => {
            // The acquire future was dropped part-way; tear down what it started
            drop(acquired);
            if let Err(e) = driver.release().await {
                tracing::warn!(error = %e, "Failed to release the debugger");
            }
            return interrupted(&mut trace, trace_path);
        }
    };

    trace.debugger = Some(session.driver().info());
    let mut engine = SteppingEngine::new(EngineSettings::from_config(&settings));

    let outcome = ctx
        .timer
        .time("running debugger", async {
            tokio::select! {
                result = engine.run(session.driver(), &mut trace) => result,
                signal = shutdown.recv() => {
                    tracing::warn!(signal, "Interrupted, tearing down the debugger");
                    Err(Error::Interrupted)
                }
            }
        })
        .await;

    if matches!(outcome, Err(Error::Interrupted)) {
        trace.record_failure(
            FailureKind::Interrupted,
            Error::Interrupted.to_string(),
            Vec::new(),
        );
    }

    if let Err(e) = session.release().await {
        tracing::warn!(error = %e, "Failed to release the debugger");
    }

    trace.save(trace_path)?;
    tracing::info!(
        steps = trace.steps.len(),
        state = ?engine.state(),
        trace = %trace_path.display(),
        "Trace written"
    );

    outcome
}

/// Annotate and persist a run that was interrupted before stepping began
fn interrupted(trace: &mut Trace, trace_path: &Path) -> Result<()> {
    trace.record_failure(
        FailureKind::Interrupted,
        Error::Interrupted.to_string(),
        Vec::new(),
    );
    trace.save(trace_path)?;
    Err(Error::Interrupted)
}

/// Turn a load failure into the child's error, keeping the captured
/// context only in verbose mode
fn load_error(mut failure: LoadFailure, verbose: bool) -> Error {
    tracing::error!(debugger = %failure.debugger, message = %failure.message, "Load failed");
    if !verbose {
        failure.trace.clear();
    }
    Error::Load(failure)
}

/// SIGINT/SIGTERM listener.
///
/// Handlers are registered by [`ShutdownSignal::install`], so signals that
/// arrive before the first `recv` are not lost.
#[cfg(unix)]
pub(crate) struct ShutdownSignal {
    handlers: Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)>,
}

#[cfg(unix)]
impl ShutdownSignal {
    pub(crate) fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => Some((term, int)),
            _ => {
                tracing::warn!("Could not install signal handlers");
                None
            }
        };
        Self { handlers }
    }

    /// Resolve with the signal name once one is delivered
    pub(crate) async fn recv(&mut self) -> &'static str {
        let Some((sigterm, sigint)) = self.handlers.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    }
}

#[cfg(not(unix))]
pub(crate) struct ShutdownSignal;

#[cfg(not(unix))]
impl ShutdownSignal {
    pub(crate) fn install() -> Self {
        Self
    }

    pub(crate) async fn recv(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(_) => std::future::pending().await,
        }
    }
}
