//! DAP client for communicating with debug adapters
//!
//! A background task owns the adapter's stdout. Responses are routed to the
//! request that is waiting for them, events go to a channel the driver drains
//! whenever it polls the run state. Requests never read from the adapter
//! themselves, so a dropped request future cannot leave a half-read message
//! behind.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::codec;
use super::types::*;

/// Requests waiting for a response, keyed by request seq.
/// `None` once the adapter's output has closed.
type PendingMap = Arc<Mutex<Option<HashMap<i64, oneshot::Sender<ResponseMessage>>>>>;

/// A request that has been written to the adapter but not yet answered
pub struct PendingResponse {
    command: String,
    rx: oneshot::Receiver<ResponseMessage>,
    timeout: Duration,
}

impl PendingResponse {
    /// Wait for the raw response.
    ///
    /// Cancel-safe: if the returned future is dropped before completion the
    /// response can still be awaited later.
    pub async fn response(&mut self) -> Result<ResponseMessage> {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::AdapterCrashed),
            Err(_) => Err(Error::Timeout(self.timeout.as_secs())),
        }
    }

    /// Wait for the response and decode its body
    pub async fn wait<T: DeserializeOwned>(mut self) -> Result<T> {
        let response = self.response().await?;
        decode_response(&self.command, response)
    }
}

/// Turn a response into its body, or into the adapter's error message
pub fn decode_response<T: DeserializeOwned>(command: &str, response: ResponseMessage) -> Result<T> {
    if !response.success {
        return Err(Error::dap_request_failed(
            command,
            &response
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        ));
    }

    let body = response.body.unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|e| {
        Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
    })
}

/// DAP client for communicating with a debug adapter
pub struct DapClient {
    /// Adapter subprocess
    adapter: Child,
    /// Buffered writer for adapter stdin
    writer: BufWriter<ChildStdin>,
    /// Sequence number for requests
    seq: AtomicI64,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
    pending: PendingMap,
    /// Receiver for events (given to the driver)
    event_rx: Option<mpsc::UnboundedReceiver<Event>>,
    reader_task: JoinHandle<()>,
    request_timeout: Duration,
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client.
    ///
    /// The adapter's stderr is only shown when `show_output` is set.
    pub async fn spawn(
        adapter_path: &Path,
        args: &[String],
        cwd: Option<&Path>,
        show_output: bool,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::DapProtocol(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::DapProtocol("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter
            .stdout
            .take()
            .ok_or_else(|| Error::DapProtocol("Failed to get adapter stdout".to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader_task = tokio::spawn(read_loop(
            BufReader::new(stdout),
            Arc::clone(&pending),
            event_tx,
        ));

        tracing::debug!(adapter = %adapter_path.display(), pid = ?adapter.id(), "Spawned debug adapter");

        Ok(Self {
            adapter,
            writer: BufWriter::new(stdin),
            seq: AtomicI64::new(1),
            capabilities: Capabilities::default(),
            pending,
            event_rx: Some(event_rx),
            reader_task,
            request_timeout,
        })
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.event_rx.take()
    }

    /// Get the next sequence number
    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Write a request without waiting for its response
    pub async fn send(&mut self, command: &str, arguments: Option<Value>) -> Result<PendingResponse> {
        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();

        match self.pending.lock().await.as_mut() {
            Some(pending) => {
                pending.insert(seq, tx);
            }
            None => return Err(Error::AdapterCrashed),
        }

        let request = if let Some(args) = arguments {
            serde_json::json!({
                "seq": seq,
                "type": "request",
                "command": command,
                "arguments": args
            })
        } else {
            serde_json::json!({
                "seq": seq,
                "type": "request",
                "command": command
            })
        };

        let json = serde_json::to_string(&request)?;
        tracing::trace!("DAP >>> {}", json);

        if let Err(e) = codec::write_message(&mut self.writer, &json).await {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.remove(&seq);
            }
            return Err(e);
        }

        Ok(PendingResponse {
            command: command.to_string(),
            rx,
            timeout: self.request_timeout,
        })
    }

    /// Send a request and wait for the response
    pub async fn request<T: DeserializeOwned>(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        self.send(command, arguments).await?.wait().await
    }

    /// Initialize the debug adapter
    pub async fn initialize(&mut self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeArguments::new(adapter_id);
        let caps: Capabilities = self
            .request("initialize", Some(serde_json::to_value(&args)?))
            .await?;

        self.capabilities = caps.clone();
        Ok(caps)
    }

    /// Start a launch request. Some adapters only answer it after
    /// configurationDone, so the response is returned unawaited.
    pub async fn launch(&mut self, args: LaunchArguments) -> Result<PendingResponse> {
        self.send("launch", Some(serde_json::to_value(&args)?)).await
    }

    /// Signal that configuration is done
    pub async fn configuration_done(&mut self) -> Result<()> {
        self.request::<Value>("configurationDone", None).await?;
        Ok(())
    }

    /// Replace the breakpoints of one source file
    pub async fn set_breakpoints(&mut self, source_path: &Path, lines: &[u32]) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source {
                path: Some(source_path.to_string_lossy().into_owned()),
                ..Default::default()
            },
            breakpoints: lines
                .iter()
                .map(|&line| SourceBreakpoint { line })
                .collect(),
        };

        let response: SetBreakpointsResponseBody = self
            .request("setBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Set function breakpoints
    pub async fn set_function_breakpoints(&mut self, names: &[&str]) -> Result<Vec<Breakpoint>> {
        let args = SetFunctionBreakpointsArguments {
            breakpoints: names
                .iter()
                .map(|name| FunctionBreakpoint {
                    name: name.to_string(),
                })
                .collect(),
        };

        let response: SetBreakpointsResponseBody = self
            .request(
                "setFunctionBreakpoints",
                Some(serde_json::to_value(&args)?),
            )
            .await?;

        Ok(response.breakpoints)
    }

    /// Continue execution
    pub async fn continue_execution(&mut self, thread_id: i64) -> Result<()> {
        let args = ContinueArguments {
            thread_id,
            single_thread: false,
        };

        self.request::<Value>("continue", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Step into
    pub async fn step_in(&mut self, thread_id: i64) -> Result<()> {
        let args = StepArguments {
            thread_id,
            granularity: Some("statement".to_string()),
        };

        self.request::<Value>("stepIn", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Get stack trace
    pub async fn stack_trace(&mut self, thread_id: i64, levels: i64) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: Some(levels),
        };

        let response: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.stack_frames)
    }

    /// Get threads
    pub async fn threads(&mut self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Evaluate an expression
    pub async fn evaluate(
        &mut self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some(context.to_string()),
        };

        self.request("evaluate", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Disconnect from the debug adapter
    pub async fn disconnect(&mut self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };

        // The adapter may exit before answering
        let pending = self
            .send("disconnect", Some(serde_json::to_value(&args)?))
            .await?;
        let _ = tokio::time::timeout(Duration::from_millis(500), pending.wait::<Value>()).await;

        Ok(())
    }

    /// Disconnect, then make sure the adapter process is gone
    pub async fn terminate(&mut self) -> Result<()> {
        if self.is_running() {
            let _ = self.disconnect(true).await;
        }

        match tokio::time::timeout(Duration::from_millis(500), self.adapter.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = self.adapter.kill().await;
            }
        }

        self.reader_task.abort();
        Ok(())
    }

    /// Kill the adapter without waiting. Usable where awaiting is not.
    pub fn kill_now(&mut self) {
        let _ = self.adapter.start_kill();
        self.reader_task.abort();
    }

    /// Check if the adapter is still running
    pub fn is_running(&mut self) -> bool {
        self.adapter.try_wait().ok().flatten().is_none()
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.kill_now();
    }
}

/// Route everything the adapter writes until its stdout closes
async fn read_loop(
    mut reader: BufReader<ChildStdout>,
    pending: PendingMap,
    event_tx: mpsc::UnboundedSender<Event>,
) {
    loop {
        let json = match codec::read_message(&mut reader).await {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(error = %e, "DAP reader stopped");
                break;
            }
        };
        tracing::trace!("DAP <<< {}", json);

        let msg: Value = match serde_json::from_str(&json) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Ignoring malformed DAP message: {}", e);
                continue;
            }
        };

        match msg.get("type").and_then(|v| v.as_str()).unwrap_or("unknown") {
            "response" => match serde_json::from_value::<ResponseMessage>(msg) {
                Ok(response) => {
                    let waiter = pending
                        .lock()
                        .await
                        .as_mut()
                        .and_then(|p| p.remove(&response.request_seq));
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => tracing::debug!(
                            request_seq = response.request_seq,
                            "Response for a request nobody is waiting on"
                        ),
                    }
                }
                Err(e) => tracing::warn!("Ignoring malformed DAP response: {}", e),
            },
            "event" => match serde_json::from_value::<EventMessage>(msg) {
                Ok(event_msg) => {
                    // The driver may already be gone during teardown
                    let _ = event_tx.send(Event::from_message(&event_msg));
                }
                Err(e) => tracing::warn!("Ignoring malformed DAP event: {}", e),
            },
            other => {
                tracing::warn!("Unhandled DAP message type: {}", other);
            }
        }
    }

    // Dropping the senders wakes every waiting request with AdapterCrashed
    pending.lock().await.take();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(success: bool, message: Option<&str>, body: Option<Value>) -> ResponseMessage {
        ResponseMessage {
            seq: 2,
            message_type: "response".to_string(),
            request_seq: 1,
            success,
            command: "evaluate".to_string(),
            message: message.map(str::to_string),
            body,
        }
    }

    #[test]
    fn test_decode_success_body() {
        let body = serde_json::json!({"result": "42", "type": "int"});
        let decoded: EvaluateResponseBody =
            decode_response("evaluate", response(true, None, Some(body))).unwrap();
        assert_eq!(decoded.result, "42");
        assert_eq!(decoded.type_name.as_deref(), Some("int"));
    }

    #[test]
    fn test_decode_failure_keeps_adapter_message() {
        let err = decode_response::<Value>(
            "evaluate",
            response(false, Some("no such variable"), None),
        )
        .unwrap_err();
        match err {
            Error::DapRequestFailed { command, message } => {
                assert_eq!(command, "evaluate");
                assert_eq!(message, "no such variable");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_body_as_null() {
        let value: Value = decode_response("configurationDone", response(true, None, None)).unwrap();
        assert!(value.is_null());
    }
}
