//! CLI command definitions
//!
//! Defines the clap commands for the steptrace CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::sandbox::HarnessToggle;

#[derive(Subcommand)]
pub enum Commands {
    /// Step through a program under a debugger and record a trace
    Run(RunArgs),

    /// List supported debuggers and whether their adapters were found
    #[command(name = "list-debuggers")]
    ListDebuggers,

    /// Run the debugger inside the sandbox (used internally)
    #[command(name = "run-debugger-internal", hide = true)]
    RunDebuggerInternal {
        /// Trace file to read and write back
        trace: PathBuf,

        /// Options payload written by the parent
        options: PathBuf,

        #[arg(long)]
        working_directory: PathBuf,

        #[arg(long, value_enum, default_value_t = HarnessToggle::Off)]
        lint: HarnessToggle,

        #[arg(long, value_enum, default_value_t = HarnessToggle::Off)]
        unittest: HarnessToggle,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the executable to debug
    pub executable: PathBuf,

    /// Arguments to pass to the program
    #[arg(last = true)]
    pub args: Vec<String>,

    /// Debugger backend (default from config, else lldb)
    #[arg(long)]
    pub debugger: Option<String>,

    /// Use this debug adapter executable instead of searching for one
    #[arg(long)]
    pub adapter_path: Option<PathBuf>,

    /// Breakpoint as file:line. Can be specified multiple times.
    #[arg(long = "break", short = 'b')]
    pub breakpoints: Vec<String>,

    /// Expression to evaluate at every step. Can be specified multiple times.
    #[arg(long = "watch")]
    pub watches: Vec<String>,

    /// Stop after recording this many steps
    #[arg(long)]
    pub max_steps: Option<u64>,

    /// Run from breakpoint to breakpoint instead of single-stepping
    #[arg(long)]
    pub go: bool,

    /// Trace file (default: steptrace.json in the working directory)
    #[arg(long)]
    pub trace: Option<PathBuf>,

    /// Continue the trace file of an earlier run instead of starting fresh
    #[arg(long)]
    pub resume: bool,

    /// Source file of interest, recorded in the trace
    #[arg(long = "source")]
    pub sources: Vec<PathBuf>,

    /// Show the debug adapter's own output
    #[arg(long)]
    pub show_debugger: bool,

    /// Preferred debugger version, e.g. 17 to look for lldb-dap-17
    #[arg(long)]
    pub debugger_version: Option<String>,

    /// Working directory for the debuggee (default: current directory)
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = HarnessToggle::Off)]
    pub lint: HarnessToggle,

    #[arg(long, value_enum, default_value_t = HarnessToggle::Off)]
    pub unittest: HarnessToggle,

    /// Kill the sandbox after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print every recorded step and load diagnostics
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Report how long each phase took
    #[arg(long)]
    pub time_report: bool,
}
