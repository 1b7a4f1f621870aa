//! Stepping engine
//!
//! Drives an acquired [`Driver`] from launch to exit (or to the step limit),
//! appending one [`Step`] to the trace at every stop.

use std::time::{Duration, Instant};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::driver::{Driver, RawFrame};
use crate::trace::{FailureKind, Frame, Location, Step, StepMode, StopReason, Trace};

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Stepping,
    Finished,
    Failed,
}

/// Timing and safety limits for a run
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Interval between run-state polls while the debuggee runs
    pub poll_interval: Duration,
    /// Longest wait for the debuggee to stop
    pub stop_timeout: Duration,
    /// Limit used when the run configuration sets none
    pub max_steps: Option<u64>,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.engine.poll_interval(),
            stop_timeout: Duration::from_secs(config.timeouts.stop_secs),
            max_steps: (config.engine.max_steps > 0).then_some(config.engine.max_steps),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct SteppingEngine {
    settings: EngineSettings,
    state: EngineState,
}

impl SteppingEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            state: EngineState::NotStarted,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run the debuggee to completion, recording steps into `trace`.
    ///
    /// On failure the trace keeps every step recorded so far and carries a
    /// failure annotation; the error is returned as well.
    #[tracing::instrument(skip_all, fields(mode = ?trace.config.mode, first_index = trace.next_step_index()))]
    pub async fn run(&mut self, driver: &mut dyn Driver, trace: &mut Trace) -> Result<()> {
        match self.drive(driver, trace).await {
            Ok(()) => {
                self.state = EngineState::Finished;
                tracing::info!(steps = trace.steps.len(), "Run finished");
                Ok(())
            }
            Err(e) => {
                self.state = EngineState::Failed;
                tracing::error!(error = %e, steps = trace.steps.len(), "Run failed");
                trace.record_failure(FailureKind::DriverOperation, e.to_string(), diagnostic(&e));
                Err(e)
            }
        }
    }

    async fn drive(&mut self, driver: &mut dyn Driver, trace: &mut Trace) -> Result<()> {
        let config = trace.config.clone();

        driver.clear_breakpoints().await?;
        for bp in &config.breakpoints {
            driver.add_breakpoint(&bp.path, bp.line).await?;
        }
        driver.launch().await?;
        self.state = EngineState::Stepping;

        let limit = config.step_limit.or(self.settings.max_steps);
        let mut recorded: u64 = 0;

        loop {
            self.wait_for_stop(driver).await?;
            if driver.is_finished().await? {
                tracing::debug!("Debuggee exited");
                return Ok(());
            }

            let mut step = driver.get_step_info(trace.next_step_index()).await?;
            for watch in &config.watches {
                step.watches.push(driver.evaluate_expression(watch).await?);
            }
            tracing::debug!(
                index = step.step_index,
                location = %step.location(),
                reason = %step.stop_reason,
                "Recorded step"
            );
            trace.push_step(step)?;
            recorded += 1;

            if let Some(limit) = limit {
                if recorded >= limit {
                    if config.step_limit.is_none() {
                        tracing::warn!(limit, "Stopped at the default step limit");
                    }
                    return Ok(());
                }
            }

            match config.mode {
                StepMode::Step => driver.step().await?,
                StepMode::Go => driver.go().await?,
            }
        }
    }

    async fn wait_for_stop(&self, driver: &mut dyn Driver) -> Result<()> {
        let deadline = Instant::now() + self.settings.stop_timeout;
        while driver.is_running().await? {
            if Instant::now() >= deadline {
                return Err(Error::driver_op(
                    "wait for stop",
                    Error::Timeout(self.settings.stop_timeout.as_secs()),
                ));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
        Ok(())
    }
}

/// Cut the stack at the first frame that belongs to process startup.
///
/// Names match by substring, so decorated names like `__tmainCRTStartup`
/// variants are caught too.
pub fn trim_frames<'a>(raw: &'a [RawFrame], below_main: &[&str]) -> &'a [RawFrame] {
    let end = raw
        .iter()
        .position(|frame| below_main.iter().any(|name| frame.name.contains(name)))
        .unwrap_or(raw.len());
    &raw[..end]
}

/// Assemble a step from what the driver reported.
///
/// Only the innermost retained frame carries `location`.
pub fn build_step(
    step_index: u64,
    raw: &[RawFrame],
    below_main: &[&str],
    location: Location,
) -> Step {
    let stop_reason = StopReason::classify(&location);
    let mut location = Some(location);

    let frames = trim_frames(raw, below_main)
        .iter()
        .map(|frame| Frame {
            function: (!frame.name.is_empty()).then(|| frame.name.clone()),
            is_inlined: frame.is_inlined,
            location: location.take().unwrap_or_default(),
        })
        .collect();

    Step {
        step_index,
        frames,
        stop_reason,
        watches: Vec::new(),
    }
}

/// Source chain of an error, one line per cause
fn diagnostic(error: &Error) -> Vec<String> {
    let mut lines = Vec::new();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RunState;
    use crate::trace::{BreakpointSpec, EvaluatedExpression, RunConfig, Sentinels};
    use async_trait::async_trait;
    use std::path::Path;

    const SENTINELS: Sentinels = Sentinels {
        optimized_away: &["<optimized out>"],
        irretrievable: &["<unavailable>"],
    };

    const BELOW_MAIN: &[&str] = &["mainCRTStartup", "__libc_start_main"];

    /// Replays a fixed list of stops
    struct ScriptedDriver {
        stops: Vec<Location>,
        position: usize,
        launched: bool,
        /// Polls left that still report Running
        running_polls: u32,
        /// 1-based resume call that fails
        fail_on_resume: Option<usize>,
        resumes: usize,
        calls: Vec<String>,
    }

    impl ScriptedDriver {
        fn new(stops: Vec<Location>) -> Self {
            Self {
                stops,
                position: 0,
                launched: false,
                running_polls: 0,
                fail_on_resume: None,
                resumes: 0,
                calls: Vec::new(),
            }
        }

        fn resume(&mut self, call: &str) -> Result<()> {
            self.calls.push(call.to_string());
            self.resumes += 1;
            if self.fail_on_resume == Some(self.resumes) {
                return Err(Error::driver_op(call, "target not responding"));
            }
            self.position += 1;
            self.running_polls = 2;
            Ok(())
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        fn name(&self) -> &str {
            "scripted"
        }
        fn version(&self) -> Option<String> {
            Some("1.0".to_string())
        }
        fn frames_below_main(&self) -> &[&'static str] {
            BELOW_MAIN
        }
        async fn acquire(&mut self) -> Result<()> {
            Ok(())
        }
        async fn release(&mut self) -> Result<()> {
            Ok(())
        }
        fn abort(&mut self) {}
        async fn clear_breakpoints(&mut self) -> Result<()> {
            self.calls.push("clear".to_string());
            Ok(())
        }
        async fn add_breakpoint(&mut self, path: &Path, line: u32) -> Result<()> {
            self.calls.push(format!("break {}:{}", path.display(), line));
            Ok(())
        }
        async fn launch(&mut self) -> Result<()> {
            self.calls.push("launch".to_string());
            self.launched = true;
            self.running_polls = 1;
            Ok(())
        }
        async fn step(&mut self) -> Result<()> {
            self.resume("step")
        }
        async fn go(&mut self) -> Result<()> {
            self.resume("go")
        }
        async fn run_state(&mut self) -> Result<RunState> {
            if !self.launched {
                return Ok(RunState::Idle);
            }
            if self.running_polls > 0 {
                self.running_polls -= 1;
                return Ok(RunState::Running);
            }
            if self.position >= self.stops.len() {
                Ok(RunState::Exited)
            } else {
                Ok(RunState::Stopped)
            }
        }
        async fn stack_frames(&mut self) -> Result<Vec<RawFrame>> {
            Ok(vec![
                RawFrame::new("foo"),
                RawFrame::new("main"),
                RawFrame::new("__libc_start_main"),
            ])
        }
        async fn last_location(&mut self) -> Result<Location> {
            Ok(self.stops[self.position].clone())
        }
        async fn evaluate_expression(&mut self, expression: &str) -> Result<EvaluatedExpression> {
            Ok(match expression {
                "x" => EvaluatedExpression::from_value(
                    expression,
                    self.position.to_string(),
                    Some("int".to_string()),
                    true,
                    &SENTINELS,
                ),
                _ => EvaluatedExpression::from_error(
                    expression,
                    "use of undeclared identifier".to_string(),
                    &SENTINELS,
                ),
            })
        }
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(1),
            stop_timeout: Duration::from_secs(5),
            max_steps: Some(1000),
        }
    }

    fn three_stops() -> Vec<Location> {
        vec![
            Location::at("a.cpp", 10),
            Location::at("a.cpp", 11),
            Location::new(None, None, None),
        ]
    }

    #[test]
    fn test_trim_stops_at_crt_startup() {
        let raw: Vec<RawFrame> = ["foo", "bar", "mainCRTStartup", "__tmainCRTStartup"]
            .into_iter()
            .map(RawFrame::new)
            .collect();
        let kept: Vec<&str> = trim_frames(&raw, BELOW_MAIN)
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(kept, vec!["foo", "bar"]);
    }

    #[test]
    fn test_trim_keeps_everything_without_startup_frames() {
        let raw = vec![RawFrame::new("foo"), RawFrame::new("main")];
        assert_eq!(trim_frames(&raw, BELOW_MAIN).len(), 2);
        assert!(trim_frames(&[], BELOW_MAIN).is_empty());
    }

    #[test]
    fn test_only_innermost_frame_has_location() {
        let raw = vec![RawFrame::new("foo"), RawFrame::new(""), RawFrame::new("main")];
        let step = build_step(4, &raw, BELOW_MAIN, Location::at("a.cpp", 3));
        assert_eq!(step.step_index, 4);
        assert_eq!(step.stop_reason, StopReason::Breakpoint);
        assert_eq!(step.frames[0].location, Location::at("a.cpp", 3));
        assert!(step.frames[1].function.is_none());
        assert!(step.frames[1].location.is_unknown());
        assert!(step.frames[2].location.is_unknown());
    }

    #[tokio::test]
    async fn test_three_step_run() {
        let mut driver = ScriptedDriver::new(three_stops());
        let mut config = RunConfig::new("a.out");
        config.breakpoints.push(BreakpointSpec::new("a.cpp", 10));
        let mut trace = Trace::new(config);

        let mut engine = SteppingEngine::new(fast_settings());
        assert_eq!(engine.state(), EngineState::NotStarted);
        engine.run(&mut driver, &mut trace).await.unwrap();

        assert_eq!(engine.state(), EngineState::Finished);
        let reasons: Vec<_> = trace.steps.iter().map(|s| s.stop_reason).collect();
        assert_eq!(
            reasons,
            vec![StopReason::Breakpoint, StopReason::Breakpoint, StopReason::Step]
        );
        let indices: Vec<_> = trace.steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(trace.steps[0].frames.len(), 2);
        assert!(trace.failure.is_none());
        assert_eq!(&driver.calls[..3], &["clear", "break a.cpp:10", "launch"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_steps() {
        let mut driver = ScriptedDriver::new(three_stops());
        driver.fail_on_resume = Some(2);
        let mut trace = Trace::new(RunConfig::new("a.out"));

        let mut engine = SteppingEngine::new(fast_settings());
        assert!(engine.run(&mut driver, &mut trace).await.is_err());

        assert_eq!(engine.state(), EngineState::Failed);
        let indices: Vec<_> = trace.steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1]);
        let failure = trace.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::DriverOperation);
        assert!(failure.message.contains("target not responding"));
    }

    #[tokio::test]
    async fn test_step_limit_and_go_mode() {
        let mut driver = ScriptedDriver::new(three_stops());
        let mut config = RunConfig::new("a.out");
        config.mode = StepMode::Go;
        config.step_limit = Some(2);
        let mut trace = Trace::new(config);

        let mut engine = SteppingEngine::new(fast_settings());
        engine.run(&mut driver, &mut trace).await.unwrap();

        assert_eq!(trace.steps.len(), 2);
        assert_eq!(driver.calls.iter().filter(|c| *c == "go").count(), 1);
        assert!(!driver.calls.iter().any(|c| c == "step"));
    }

    #[tokio::test]
    async fn test_watches_and_resumed_indices() {
        let mut driver = ScriptedDriver::new(three_stops());
        let mut config = RunConfig::new("a.out");
        config.watches = vec!["x".to_string(), "nope".to_string()];
        config.first_step_index = 7;
        let mut trace = Trace::new(config);

        SteppingEngine::new(fast_settings())
            .run(&mut driver, &mut trace)
            .await
            .unwrap();

        assert_eq!(trace.steps[0].step_index, 7);
        let watches = &trace.steps[1].watches;
        assert_eq!(watches[0].value.as_deref(), Some("1"));
        assert!(watches[0].could_evaluate);
        assert!(!watches[1].could_evaluate);
        assert!(watches[1].error.is_some());
    }

    #[tokio::test]
    async fn test_stop_timeout_is_a_failure() {
        let mut driver = ScriptedDriver::new(three_stops());
        driver.running_polls = u32::MAX;
        let engine = SteppingEngine::new(EngineSettings {
            poll_interval: Duration::from_millis(1),
            stop_timeout: Duration::from_millis(20),
            max_steps: None,
        });

        // launch() resets the poll budget, so stall it afterwards
        driver.launched = true;
        let err = engine.wait_for_stop(&mut driver).await.unwrap_err();
        assert!(matches!(err, Error::DriverOperation { .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
