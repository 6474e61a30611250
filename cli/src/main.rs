//! bgproc CLI binary
//!
//! Command-line interface for running and managing background
//! processes. `start` forks before any async runtime exists, so this
//! binary builds a runtime per command instead of using
//! `#[tokio::main]`.

use bgproc_core::{Controller, EnvOverride, OutputCallback, OutputStream};
use clap::{Parser, Subcommand};
use error::{CliError, Result};
use schema::{ProcessConfig, StartStatus};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod error;

#[derive(Parser)]
#[command(name = "bgproc")]
#[command(about = "Run and manage background processes")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the PID state file (defaults to .pids.db in the working directory)
    #[arg(long, global = true, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command in the foreground and wait for it to finish
    Run {
        /// Discard the command's output
        #[arg(short, long)]
        quiet: bool,
        /// Signal number used to stop the process (default 15, SIGTERM)
        #[arg(short, long)]
        signal: Option<i32>,
        /// The command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Start a command as a managed background process
    Start {
        /// Signal number used to stop the process (default 15, SIGTERM)
        #[arg(short, long)]
        signal: Option<i32>,
        /// The command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Stop a managed background process
    Stop {
        /// PID of the managed process
        pid: u32,
    },
    /// List managed background processes
    List,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute(cli) {
        error!(code = e.code(), "Command failed: {}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn execute(cli: Cli) -> Result<()> {
    let mut controller = Controller::new()
        .with_env_override(EnvOverride::from_env("SYMFONY_DOTENV_VARS", "APP_ENV"));
    if let Some(path) = cli.state_file {
        controller = controller.with_store_path(path);
    }
    let verbose = cli.verbose > 0;

    match cli.command {
        Commands::Run {
            quiet,
            signal,
            command,
        } => {
            let config = ProcessConfig::new(command, signal);
            let disable_output = quiet && !verbose;
            let callback: Option<OutputCallback> = Some(Box::new(|stream, line| match stream {
                OutputStream::Stdout => println!("{line}"),
                OutputStream::Stderr => eprintln!("{line}"),
            }));
            runtime()?.block_on(controller.run(&config, disable_output, callback))?;
            Ok(())
        }
        Commands::Start { signal, command } => {
            let config = ProcessConfig::new(command, signal);
            // The fork happens here, before any runtime exists. The
            // parent gets Started; the daemonized child gets Stopped
            // once its monitor loop ends, and exits quietly.
            match controller.start(&config)? {
                StartStatus::Started => println!("Command started in the background."),
                StartStatus::Stopped => {}
            }
            Ok(())
        }
        Commands::Stop { pid } => {
            runtime()?.block_on(controller.stop(pid))?;
            println!("Stop requested for process {}.", pid);
            Ok(())
        }
        Commands::List => {
            let records = runtime()?.block_on(controller.list())?;
            if records.is_empty() {
                println!("No processes are running.");
            } else {
                for record in records {
                    println!("{}\t{}", record.pid, record.config.command_line());
                }
            }
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::from)
}
