//! steptrace - record what a debugger sees while stepping through a program
//!
//! Drives a debugger backend over the Debug Adapter Protocol inside a
//! sandbox process and writes every stop to a JSON trace.

use clap::Parser;
use commands::Commands;
use steptrace::common::{logging, Error};
use steptrace::{cli, commands, sandbox};

#[derive(Parser)]
#[command(name = "steptrace", about = "Step through a program under a debugger and record a trace")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let internal = matches!(cli.command, Commands::RunDebuggerInternal { .. });

    match &cli.command {
        Commands::RunDebuggerInternal { .. } => {
            if let Some(log) = logging::init_sandbox() {
                tracing::debug!(log = %log.display(), "Sandbox logging to file");
            }
        }
        _ => logging::init_cli(),
    }

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        let mut code = 1;
        if let Error::Load(failure) = &e {
            for line in &failure.trace {
                eprintln!("  {line}");
            }
            // Lets the parent tell a load failure from a crash
            if internal {
                code = sandbox::LOAD_FAILURE_EXIT_CODE;
            }
        }
        std::process::exit(code);
    }
}
