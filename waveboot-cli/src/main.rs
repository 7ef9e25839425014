//! waveboot CLI - program nodes running the Waveboot bootloader.
//!
//! ## Features
//!
//! - Program an Intel HEX image through a serial programmer bridge
//! - Offline validation and frame listing of HEX files
//! - Interactive port, file and reset-code selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod provider;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and symbols should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing input that a prompt would have supplied.
    #[error("{0}")]
    Usage(String),
    /// The user aborted.
    #[error("{0}")]
    Cancelled(String),
    /// The operation ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
            Self::Failed(_) => 1,
        }
    }
}

/// Exit code for an error chain.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(waveboot::Error::Interrupted) = cause.downcast_ref::<waveboot::Error>() {
            return 130;
        }
    }
    1
}

/// waveboot - program nodes running the Waveboot bootloader over a serial bridge.
///
/// Environment variables:
///   WAVEBOOT_PORT              - Default serial port
///   WAVEBOOT_BAUD              - Bridge baud rate (default: 9600)
///   WAVEBOOT_RESET_CODE        - Reset code of the target node
///   WAVEBOOT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "waveboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the programmer bridge.
    #[arg(short, long, global = true, env = "WAVEBOOT_PORT")]
    port: Option<String>,

    /// Baud rate of the programmer bridge.
    #[arg(short, long, global = true, env = "WAVEBOOT_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "WAVEBOOT_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reset the node and program a HEX image.
    Program {
        /// Intel HEX file (selected from the working directory if omitted).
        hex: Option<PathBuf>,

        /// Reset code the node listens for.
        #[arg(long, env = "WAVEBOOT_RESET_CODE")]
        reset_code: Option<String>,

        /// Attempts per line before giving up.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        attempts: Option<u32>,

        /// How long to wait for each line acknowledgment, in milliseconds.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        ack_timeout_ms: Option<u64>,

        /// How long to wait for the bootloader after BOOT, in seconds.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        handshake_timeout_secs: Option<u64>,

        /// Send records without checking their count and checksum first.
        #[arg(long)]
        skip_verify: bool,
    },

    /// Validate a HEX file without touching any port.
    Check {
        /// Intel HEX file.
        hex: PathBuf,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print the frame of every record as a C array.
    Encode {
        /// Intel HEX file.
        hex: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Help and version go to stdout with code 0, usage errors to stderr with 2.
        Err(e) => e.exit(),
    };

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    waveboot::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "waveboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Program {
            hex,
            reset_code,
            attempts,
            ack_timeout_ms,
            handshake_timeout_secs,
            skip_verify,
        } => commands::program::cmd_program(
            cli,
            &config,
            &commands::program::ProgramArgs {
                hex: hex.clone(),
                reset_code: reset_code.clone(),
                attempts: *attempts,
                ack_timeout_ms: *ack_timeout_ms,
                handshake_timeout_secs: *handshake_timeout_secs,
                skip_verify: *skip_verify,
            },
        ),
        Commands::Check { hex, json } => commands::check::cmd_check(cli, hex, *json),
        Commands::Encode { hex } => commands::check::cmd_encode(hex),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
