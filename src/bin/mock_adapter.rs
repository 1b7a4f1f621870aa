//! Mock DAP adapter binary for integration testing
//!
//! Plays a scripted program: the debuggee stops at `--lines` in order, one
//! stop per step, and exits after the last one. Failures can be injected to
//! exercise the error and teardown paths of the driver and the sandbox.

use clap::Parser;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Frames every stack ends with, below main
const RUNTIME_FRAMES: &[&str] = &["__libc_start_call_main", "__libc_start_main", "_start"];

#[derive(Parser, Debug)]
#[command(name = "mock_adapter", version, about = "Scripted DAP adapter for tests")]
struct Args {
    /// Source file the debuggee stops in
    #[arg(long, default_value = "/src/a.cpp")]
    file: String,

    /// Lines of successive stops; 0 means a stop without source information
    #[arg(long, value_delimiter = ',', default_value = "10,11,12")]
    lines: Vec<u32>,

    /// User frames, innermost first
    #[arg(long, value_delimiter = ',', default_value = "main")]
    frames: Vec<String>,

    /// Fail stepIn/continue once this many stops have been reported
    #[arg(long)]
    fail_after: Option<usize>,

    /// Exit abruptly on stepIn/continue once this many stops have been reported
    #[arg(long)]
    crash_after: Option<usize>,

    /// Reject the launch request with this message
    #[arg(long)]
    refuse_launch: Option<String>,

    /// Stop answering on stepIn/continue once this many stops have been reported
    #[arg(long)]
    hang_after: Option<usize>,

    /// Never answer the launch request
    #[arg(long)]
    hang_on_launch: bool,

    /// Write the adapter's pid here when it starts hanging
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::new(args);

    while let Some(message) = read_message(&mut reader) {
        let Some(outcome) = state.process_message(&message) else {
            continue;
        };
        for reply in &outcome.replies {
            send_message(&mut writer, reply);
        }
        if outcome.exit {
            break;
        }
    }
}

fn read_message<R: BufRead>(reader: &mut R) -> Option<Value> {
    loop {
        let mut content_length = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).ok()? == 0 {
                return None;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(len) = line.strip_prefix("Content-Length:") {
                content_length = len.trim().parse::<usize>().ok();
            }
        }

        let Some(len) = content_length else {
            continue;
        };
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).ok()?;
        if let Ok(value) = serde_json::from_slice(&body) {
            return Some(value);
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let body = message.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).ok();
    writer.write_all(body.as_bytes()).ok();
    writer.flush().ok();
}

struct Outcome {
    replies: Vec<Value>,
    exit: bool,
}

struct MockState {
    args: Args,
    seq: i64,
    /// Index into `args.lines` of the current stop
    position: usize,
    /// Stops reported so far
    stops: usize,
    breakpoints: HashMap<String, Vec<u32>>,
}

impl MockState {
    fn new(args: Args) -> Self {
        Self {
            args,
            seq: 1,
            position: 0,
            stops: 0,
            breakpoints: HashMap::new(),
        }
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn event(&mut self, event: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": event,
            "body": body
        })
    }

    fn current_line(&self) -> u32 {
        self.args.lines.get(self.position).copied().unwrap_or(0)
    }

    /// Events for arriving at `self.position`: a stop, or program exit
    fn arrive(&mut self, reason: &str) -> Vec<Value> {
        if self.position >= self.args.lines.len() {
            return vec![
                self.event("exited", json!({ "exitCode": 0 })),
                self.event("terminated", json!({})),
            ];
        }
        self.stops += 1;
        vec![self.event(
            "stopped",
            json!({
                "reason": reason,
                "threadId": 1,
                "allThreadsStopped": true
            }),
        )]
    }

    /// Go silent until killed
    fn hang(&self) -> ! {
        if let Some(path) = &self.args.pid_file {
            std::fs::write(path, std::process::id().to_string()).ok();
        }
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }

    fn is_breakpoint(&self, line: u32) -> bool {
        self.breakpoints.values().any(|lines| lines.contains(&line))
    }

    fn stack_frames(&self) -> Vec<Value> {
        let line = self.current_line();
        let mut frames = Vec::new();

        for (i, name) in self.args.frames.iter().enumerate() {
            let mut frame = json!({
                "id": i + 1,
                "name": name,
                "line": 0,
                "column": 0
            });
            if i == 0 && line > 0 {
                frame["line"] = json!(line);
                frame["source"] = json!({
                    "name": self.args.file.rsplit('/').next().unwrap_or(&self.args.file),
                    "path": self.args.file
                });
            }
            frames.push(frame);
        }
        for name in RUNTIME_FRAMES {
            frames.push(json!({
                "id": frames.len() + 1,
                "name": name,
                "line": 0,
                "column": 0
            }));
        }
        frames
    }

    fn evaluate(&self, expression: &str) -> Result<Value, String> {
        match expression {
            "line" => Ok(json!({ "result": self.current_line().to_string(), "type": "int" })),
            "step" => Ok(json!({ "result": self.position.to_string(), "type": "unsigned long" })),
            "opt" => Ok(json!({ "result": "<optimized out>", "type": "int" })),
            "gone" => Err("error: Couldn't read memory at 0x0: <unavailable>".to_string()),
            _ => Err(format!("use of undeclared identifier '{}'", expression)),
        }
    }

    fn process_message(&mut self, message: &Value) -> Option<Outcome> {
        if message.get("type")?.as_str()? != "request" {
            return None;
        }

        let command = message.get("command")?.as_str()?.to_string();
        let request_seq = message.get("seq")?.as_i64()?;
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let mut events = Vec::new();
        let mut exit = false;

        let result: Result<Value, String> = match command.as_str() {
            "initialize" => Ok(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsFunctionBreakpoints": true,
                "supportsTerminateRequest": true
            })),
            "launch" if self.args.hang_on_launch => self.hang(),
            "launch" => match &self.args.refuse_launch {
                Some(message) => Err(message.clone()),
                None => {
                    events.push(self.event("initialized", json!({})));
                    Ok(Value::Null)
                }
            },
            "setBreakpoints" => {
                let source = arguments
                    .get("source")
                    .and_then(|s| s.get("path"))
                    .and_then(|p| p.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let lines: Vec<u32> = arguments
                    .get("breakpoints")
                    .and_then(|b| b.as_array())
                    .map(|bps| {
                        bps.iter()
                            .filter_map(|bp| bp.get("line").and_then(|l| l.as_u64()))
                            .map(|l| l as u32)
                            .collect()
                    })
                    .unwrap_or_default();

                let placed: Vec<Value> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| json!({ "id": i + 1, "verified": true, "line": line }))
                    .collect();
                self.breakpoints.insert(source, lines);
                Ok(json!({ "breakpoints": placed }))
            }
            "setFunctionBreakpoints" => {
                let count = arguments
                    .get("breakpoints")
                    .and_then(|b| b.as_array())
                    .map_or(0, |b| b.len());
                let placed: Vec<Value> = (0..count)
                    .map(|i| json!({ "id": 100 + i, "verified": true }))
                    .collect();
                Ok(json!({ "breakpoints": placed }))
            }
            "configurationDone" => {
                events.extend(self.arrive("function breakpoint"));
                Ok(Value::Null)
            }
            "stepIn" | "continue" => {
                if self.args.crash_after == Some(self.stops) {
                    std::process::exit(3);
                }
                if self.args.hang_after == Some(self.stops) {
                    self.hang();
                }
                if self.args.fail_after == Some(self.stops) {
                    Err("target not responding".to_string())
                } else if command == "stepIn" {
                    self.position += 1;
                    events.extend(self.arrive("step"));
                    Ok(Value::Null)
                } else {
                    self.position = (self.position + 1..self.args.lines.len())
                        .find(|&i| self.is_breakpoint(self.args.lines[i]))
                        .unwrap_or(self.args.lines.len());
                    events.extend(self.arrive("breakpoint"));
                    Ok(json!({ "allThreadsContinued": true }))
                }
            }
            "threads" => Ok(json!({ "threads": [{ "id": 1, "name": "main" }] })),
            "stackTrace" => {
                let frames = self.stack_frames();
                Ok(json!({ "totalFrames": frames.len(), "stackFrames": frames }))
            }
            "evaluate" => {
                let expression = arguments
                    .get("expression")
                    .and_then(|e| e.as_str())
                    .unwrap_or("");
                self.evaluate(expression)
                    .map(|mut body| {
                        body["variablesReference"] = json!(0);
                        body
                    })
            }
            "disconnect" => {
                exit = true;
                Ok(Value::Null)
            }
            _ => Err(format!("Unknown command: {}", command)),
        };

        let seq = self.next_seq();
        let response = match result {
            Ok(body) => json!({
                "seq": seq,
                "type": "response",
                "request_seq": request_seq,
                "success": true,
                "command": command,
                "body": body
            }),
            Err(message) => json!({
                "seq": seq,
                "type": "response",
                "request_seq": request_seq,
                "success": false,
                "command": command,
                "message": message
            }),
        };

        // The response precedes the events it caused
        let mut replies = vec![response];
        replies.extend(events);
        Some(Outcome { replies, exit })
    }
}
