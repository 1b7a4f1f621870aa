//! Driver for backends that speak DAP

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::dap::{DapClient, Event, LaunchArguments, PendingResponse, StackFrame};
use crate::trace::{EvaluatedExpression, Location};

use super::{BackendProfile, Driver, DriverConfig, RawFrame, ResolvedAdapter, RunState};

/// Frames requested per stack trace
const MAX_STACK_DEPTH: i64 = 256;

/// How long the adapter gets to answer `--version`
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct DapDriver {
    profile: &'static BackendProfile,
    adapter: ResolvedAdapter,
    config: DriverConfig,
    init_timeout: Duration,
    request_timeout: Duration,
    client: Option<DapClient>,
    events: Option<UnboundedReceiver<Event>>,
    /// Launch request some adapters answer only after configurationDone
    pending_launch: Option<PendingResponse>,
    state: RunState,
    thread_id: Option<i64>,
    breakpoints: BTreeMap<PathBuf, BTreeSet<u32>>,
    version: Option<String>,
    /// Stack of the current stop, fetched on demand
    stack: Option<Vec<StackFrame>>,
}

impl DapDriver {
    pub fn new(
        profile: &'static BackendProfile,
        adapter: ResolvedAdapter,
        config: DriverConfig,
        timeouts: &Timeouts,
    ) -> Self {
        Self {
            profile,
            adapter,
            config,
            init_timeout: Duration::from_secs(timeouts.adapter_init_secs),
            request_timeout: Duration::from_secs(timeouts.request_secs),
            client: None,
            events: None,
            pending_launch: None,
            state: RunState::Idle,
            thread_id: None,
            breakpoints: BTreeMap::new(),
            version: None,
            stack: None,
        }
    }

    fn client(&mut self) -> Result<&mut DapClient> {
        self.client
            .as_mut()
            .ok_or_else(|| Error::Internal("debug adapter is not running".to_string()))
    }

    /// Wait for the initialized event, failing early if the launch is rejected
    async fn wait_initialized(&mut self) -> Result<()> {
        let timeout = self.init_timeout;
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| Error::Internal("event channel already taken".to_string()))?;
        let launch = self
            .pending_launch
            .as_mut()
            .ok_or_else(|| Error::Internal("launch was not sent".to_string()))?;

        let initialized = async {
            loop {
                match events.recv().await {
                    Some(Event::Initialized) => return Ok(()),
                    Some(Event::Output(output)) => {
                        tracing::debug!(category = ?output.category, "{}", output.output.trim_end());
                    }
                    Some(other) => tracing::trace!(?other, "Event before initialized"),
                    None => return Err(Error::AdapterCrashed),
                }
            }
        };

        let launch_answered = tokio::select! {
            result = tokio::time::timeout(timeout, initialized) => {
                result.map_err(|_| Error::Timeout(timeout.as_secs()))??;
                None
            }
            response = launch.response() => Some(response?),
        };

        if let Some(response) = launch_answered {
            self.pending_launch = None;
            crate::dap::client::decode_response::<serde_json::Value>("launch", response)?;
            // Launch accepted before initialized; keep waiting for it
            let events = self
                .events
                .as_mut()
                .ok_or_else(|| Error::Internal("event channel already taken".to_string()))?;
            let wait = async {
                loop {
                    match events.recv().await {
                        Some(Event::Initialized) => return Ok(()),
                        Some(_) => continue,
                        None => return Err(Error::AdapterCrashed),
                    }
                }
            };
            tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| Error::Timeout(timeout.as_secs()))??;
        }

        Ok(())
    }

    /// Apply queued events to the run state
    fn drain_events(&mut self) -> Result<()> {
        let Some(events) = self.events.as_mut() else {
            return Ok(());
        };

        let mut received = Vec::new();
        let mut disconnected = false;
        loop {
            match events.try_recv() {
                Ok(event) => received.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        for event in received {
            self.handle_event(event);
        }

        if disconnected && self.state != RunState::Exited {
            return Err(Error::AdapterCrashed);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Stopped(body) => {
                tracing::debug!(reason = %body.reason, thread = ?body.thread_id, "Debuggee stopped");
                self.state = RunState::Stopped;
                self.stack = None;
                if body.thread_id.is_some() {
                    self.thread_id = body.thread_id;
                }
            }
            Event::Continued { .. } => {
                self.state = RunState::Running;
                self.stack = None;
            }
            Event::Exited(body) => {
                tracing::debug!(exit_code = body.exit_code, "Debuggee exited");
                self.state = RunState::Exited;
            }
            Event::Terminated => {
                self.state = RunState::Exited;
            }
            Event::Output(output) => {
                tracing::debug!(category = ?output.category, "{}", output.output.trim_end());
            }
            Event::Initialized => {}
            Event::Unknown { event, .. } => {
                tracing::trace!(event = %event, "Ignoring DAP event");
            }
        }
    }

    async fn current_thread(&mut self) -> Result<i64> {
        if let Some(id) = self.thread_id {
            return Ok(id);
        }
        let threads = self.client()?.threads().await?;
        let id = threads
            .first()
            .map(|t| t.id)
            .ok_or_else(|| Error::driver_op("threads", "debuggee has no threads"))?;
        self.thread_id = Some(id);
        Ok(id)
    }

    async fn current_stack(&mut self) -> Result<&[StackFrame]> {
        if self.stack.is_none() {
            let thread = self.current_thread().await?;
            let frames = self
                .client()?
                .stack_trace(thread, MAX_STACK_DEPTH)
                .await
                .map_err(|e| Error::driver_op("stackTrace", e))?;
            self.stack = Some(frames);
        }
        Ok(self.stack.as_deref().unwrap_or_default())
    }

    /// Resume execution through `request`, marking the debuggee running first
    async fn resume(&mut self, operation: &str) -> Result<()> {
        let thread = self.current_thread().await?;
        self.state = RunState::Running;
        self.stack = None;
        let client = self.client()?;
        let result = match operation {
            "stepIn" => client.step_in(thread).await,
            _ => client.continue_execution(thread).await,
        };
        result.map_err(|e| Error::driver_op(operation, e))
    }

    fn to_raw_frame(&self, frame: &StackFrame) -> RawFrame {
        match self.profile.inline_marker {
            Some(marker) if frame.name.contains(marker) => RawFrame {
                name: frame.name.replace(marker, "").trim().to_string(),
                is_inlined: true,
            },
            _ => RawFrame {
                name: frame.name.clone(),
                is_inlined: false,
            },
        }
    }
}

/// Run `<adapter> --version` and keep the first line
async fn probe_version(adapter: &Path) -> Option<String> {
    let output = tokio::time::timeout(
        VERSION_PROBE_TIMEOUT,
        tokio::process::Command::new(adapter)
            .arg("--version")
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Driver for DapDriver {
    fn name(&self) -> &str {
        self.profile.id
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }

    fn frames_below_main(&self) -> &[&'static str] {
        self.profile.frames_below_main
    }

    #[tracing::instrument(skip(self), fields(adapter = %self.adapter.path.display()))]
    async fn acquire(&mut self) -> Result<()> {
        let mut client = DapClient::spawn(
            &self.adapter.path,
            &self.adapter.args,
            self.config.working_directory.as_deref(),
            self.config.show_debugger,
            self.request_timeout,
        )
        .await?;
        self.events = client.take_event_receiver();

        let caps = tokio::time::timeout(self.init_timeout, client.initialize(self.profile.name))
            .await
            .map_err(|_| Error::Timeout(self.init_timeout.as_secs()))??;
        tracing::debug!(?caps, "Adapter initialized");

        let launch = client
            .launch(LaunchArguments {
                program: self.config.executable.to_string_lossy().into_owned(),
                args: self.config.args.clone(),
                cwd: self
                    .config
                    .working_directory
                    .as_ref()
                    .map(|d| d.to_string_lossy().into_owned()),
                stop_on_entry: false,
            })
            .await?;
        self.client = Some(client);
        self.pending_launch = Some(launch);

        self.wait_initialized().await?;
        self.version = probe_version(&self.adapter.path).await;
        tracing::info!(version = ?self.version, "Debugger ready");
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.pending_launch = None;
        self.events = None;
        if let Some(mut client) = self.client.take() {
            client.terminate().await?;
            tracing::debug!("Debug adapter released");
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.kill_now();
        }
        self.client = None;
        self.events = None;
    }

    async fn clear_breakpoints(&mut self) -> Result<()> {
        let files: Vec<PathBuf> = self.breakpoints.keys().cloned().collect();
        for file in files {
            self.client()?
                .set_breakpoints(&file, &[])
                .await
                .map_err(|e| Error::driver_op("setBreakpoints", e))?;
        }
        self.breakpoints.clear();
        Ok(())
    }

    async fn add_breakpoint(&mut self, path: &Path, line: u32) -> Result<()> {
        let lines = self.breakpoints.entry(path.to_path_buf()).or_default();
        if !lines.insert(line) {
            return Ok(());
        }
        let lines: Vec<u32> = lines.iter().copied().collect();

        let placed = self
            .client()?
            .set_breakpoints(path, &lines)
            .await
            .map_err(|e| Error::driver_op("setBreakpoints", e))?;
        for bp in placed.iter().filter(|bp| !bp.verified) {
            tracing::warn!(
                file = %path.display(),
                line = ?bp.line,
                message = ?bp.message,
                "Breakpoint not verified"
            );
        }
        Ok(())
    }

    async fn launch(&mut self) -> Result<()> {
        let entry = self.profile.entry_function;
        let client = self.client()?;
        if client.capabilities.supports_function_breakpoints {
            client
                .set_function_breakpoints(&[entry])
                .await
                .map_err(|e| Error::driver_op("setFunctionBreakpoints", e))?;
        } else {
            tracing::warn!("Adapter lacks function breakpoints; first stop is the first breakpoint");
        }

        self.state = RunState::Running;
        self.client()?
            .configuration_done()
            .await
            .map_err(|e| Error::driver_op("configurationDone", e))?;

        if let Some(launch) = self.pending_launch.take() {
            launch
                .wait::<serde_json::Value>()
                .await
                .map_err(|e| Error::driver_op("launch", e))?;
        }
        Ok(())
    }

    async fn step(&mut self) -> Result<()> {
        self.resume("stepIn").await
    }

    async fn go(&mut self) -> Result<()> {
        self.resume("continue").await
    }

    async fn run_state(&mut self) -> Result<RunState> {
        self.drain_events()?;
        Ok(self.state)
    }

    async fn stack_frames(&mut self) -> Result<Vec<RawFrame>> {
        let frames = self.current_stack().await?.to_vec();
        Ok(frames.iter().map(|f| self.to_raw_frame(f)).collect())
    }

    async fn last_location(&mut self) -> Result<Location> {
        let stack = self.current_stack().await?;
        let Some(top) = stack.first() else {
            return Ok(Location::unknown());
        };

        let path = top
            .source
            .as_ref()
            .and_then(|s| s.path.as_ref())
            .map(PathBuf::from);
        let line = (top.line > 0).then_some(top.line);
        let column = (top.column > 0).then_some(top.column);
        Ok(Location::new(path, line, column))
    }

    async fn evaluate_expression(&mut self, expression: &str) -> Result<EvaluatedExpression> {
        let frame_id = self.current_stack().await?.first().map(|f| f.id);
        let profile = self.profile;
        let sentinels = &profile.sentinels;

        match self.client()?.evaluate(expression, frame_id, "watch").await {
            Ok(body) => Ok(EvaluatedExpression::from_value(
                expression,
                body.result,
                body.type_name,
                true,
                sentinels,
            )),
            Err(Error::DapRequestFailed { message, .. }) => Ok(EvaluatedExpression::from_error(
                expression, message, sentinels,
            )),
            Err(e) => Err(Error::driver_op("evaluate", e)),
        }
    }
}
