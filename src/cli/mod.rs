//! CLI command handling
//!
//! Builds the run configuration, hands it to the sandbox and formats the
//! resulting trace.

use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::{Commands, RunArgs};
use crate::common::config::Config;
use crate::common::{paths, Error, Result, RunContext};
use crate::driver::{self, registry, DriverConfig};
use crate::sandbox::{self, LiveOptions, RunOptions, SandboxReport, SandboxRunner};
use crate::trace::{BreakpointSpec, RunConfig, Step, StepMode, Trace};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run(args).await,

        Commands::ListDebuggers => {
            list_debuggers()?;
            Ok(())
        }

        Commands::RunDebuggerInternal {
            trace,
            options,
            working_directory,
            lint,
            unittest,
        } => {
            let live = LiveOptions {
                working_directory,
                lint,
                unittest,
                trace_path: trace.clone(),
            };
            sandbox::run_debugger_internal(&trace, &options, live).await
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let ctx = RunContext::new(args.time_report, args.verbose);
    let settings = Config::load()?;

    let debugger = args
        .debugger
        .clone()
        .unwrap_or_else(|| settings.defaults.debugger.clone());
    if registry::get_backend(&debugger).is_none() {
        return Err(Error::UnknownDebugger {
            name: debugger,
            known: registry::known_names(),
        });
    }

    let working_directory = match &args.working_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let trace_path = args
        .trace
        .clone()
        .unwrap_or_else(|| paths::default_trace_path(&working_directory));

    let trace = if args.resume {
        resume_trace(&trace_path, args.max_steps)?
    } else {
        Trace::new(run_config(&args)?)
    };

    let options = RunOptions {
        debugger,
        executable: trace.config.executable.clone(),
        args: args.args,
        adapter_path: args.adapter_path,
        show_debugger: args.show_debugger,
        debugger_version: args.debugger_version,
        working_directory,
        lint: args.lint,
        unittest: args.unittest,
        trace_path: trace_path.clone(),
        verbose: args.verbose,
        time_report: args.time_report,
        timeout_secs: args.timeout,
    };

    let timeout = Duration::from_secs(args.timeout.unwrap_or(settings.timeouts.sandbox_secs));
    let runner = SandboxRunner::new(timeout)?;
    let report = ctx.timer.time("total", runner.run(&trace, &options)).await?;

    print_report(&report, &trace_path, ctx.verbose);

    match &report.trace.failure {
        Some(failure) => Err(Error::RunFailed {
            steps: report.trace.steps.len(),
            message: failure.message.clone(),
        }),
        None if !report.succeeded() => Err(Error::SandboxCrash(format!(
            "sandbox exited with {:?}",
            report.exit_code
        ))),
        None => Ok(()),
    }
}

/// Run configuration from the command line
fn run_config(args: &RunArgs) -> Result<RunConfig> {
    let executable = args
        .executable
        .canonicalize()
        .unwrap_or_else(|_| args.executable.clone());

    let mut config = RunConfig::new(executable);
    config.breakpoints = args
        .breakpoints
        .iter()
        .map(|b| BreakpointSpec::parse(b))
        .collect::<Result<_>>()?;
    config.watches = args.watches.clone();
    config.source_paths = args.sources.clone();
    config.mode = if args.go { StepMode::Go } else { StepMode::Step };
    config.step_limit = args.max_steps;
    Ok(config)
}

/// Load an earlier trace to append to. Its own configuration is kept.
fn resume_trace(path: &Path, max_steps: Option<u64>) -> Result<Trace> {
    let mut trace = Trace::load(path)?;
    if max_steps.is_some() {
        trace.config.step_limit = max_steps;
    }
    tracing::info!(
        steps = trace.steps.len(),
        next_index = trace.next_step_index(),
        "Resuming trace"
    );
    Ok(trace)
}

fn print_report(report: &SandboxReport, trace_path: &Path, verbose: bool) {
    let trace = &report.trace;
    let debugger = trace
        .debugger
        .as_ref()
        .map(|d| match &d.version {
            Some(version) => format!("{} ({})", d.name, version),
            None => d.name.clone(),
        })
        .unwrap_or_else(|| "no debugger".to_string());

    if verbose {
        for step in &trace.steps {
            print_step(step);
        }
    }

    match &trace.failure {
        None => println!(
            "{} Recorded {} steps with {} to {}",
            "✓".green(),
            trace.steps.len(),
            debugger,
            trace_path.display()
        ),
        Some(failure) => {
            eprintln!(
                "{} {} after {} steps ({})",
                "✗".red(),
                failure.kind.to_string().red().bold(),
                trace.steps.len(),
                debugger
            );
            for line in &failure.diagnostic {
                eprintln!("  {}", line.dimmed());
            }
        }
    }

    // The child's own stderr already holds diagnostics the annotation lacks
    if !report.succeeded() || verbose {
        let stderr = report.stderr.trim_end();
        if !stderr.is_empty() && trace.failure.as_ref().map_or(true, |f| f.diagnostic.is_empty()) {
            eprintln!("{}", stderr);
        }
    }
}

fn print_step(step: &Step) {
    let function = step
        .current_frame()
        .and_then(|f| f.function.as_deref())
        .unwrap_or("??");
    println!(
        "#{:<4} {:<10} {} in {}",
        step.step_index,
        step.stop_reason.to_string().cyan(),
        step.location(),
        function.bold()
    );
    for watch in &step.watches {
        let value = match (&watch.value, &watch.error) {
            (Some(value), _) => value.clone(),
            (None, Some(error)) => error.dimmed().to_string(),
            (None, None) => String::new(),
        };
        println!("        {} = {}", watch.expression, value);
    }
}

fn list_debuggers() -> Result<()> {
    let settings = Config::load()?;
    println!("{}", "Debuggers:".bold());

    for backend in registry::all_backends() {
        let probe = DriverConfig {
            debugger: backend.id.to_string(),
            executable: PathBuf::new(),
            args: Vec::new(),
            adapter_path: None,
            show_debugger: false,
            version_hint: None,
            working_directory: None,
        };
        let status = match driver::resolve_adapter(backend, &probe, &settings) {
            Ok(adapter) => format!("{} {}", "✓".green(), adapter.path.display()),
            Err(_) => format!("{} not found", "✗".red()),
        };
        println!(
            "  {:<10} {:<10} {}  {}",
            backend.id.bold(),
            backend.name,
            backend.description.dimmed(),
            status
        );
    }
    Ok(())
}
