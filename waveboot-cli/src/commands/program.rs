//! The `program` command: reset, handshake, then stream the image.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use waveboot::{ProgressEvent, Programmer, TransferConfig, TransferReport};

use crate::config::Config;
use crate::provider::{ConfigurationProvider, ProviderOptions};
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Per-invocation overrides of the `program` subcommand.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgramArgs {
    pub hex: Option<PathBuf>,
    pub reset_code: Option<String>,
    pub attempts: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub skip_verify: bool,
}

impl ProgramArgs {
    /// Config file settings with command-line values on top.
    fn transfer_config(&self, config: &Config) -> TransferConfig {
        let mut transfer = config.program.transfer_config();
        if let Some(attempts) = self.attempts {
            transfer = transfer.with_max_attempts(attempts);
        }
        if let Some(ms) = self.ack_timeout_ms {
            transfer = transfer.with_attempt_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = self.handshake_timeout_secs {
            transfer = transfer.with_handshake_timeout(Duration::from_secs(secs));
        }
        if self.skip_verify {
            transfer = transfer.with_verify_records(false);
        }
        transfer
    }
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn progress_message(event: &ProgressEvent) -> String {
    format!(
        "line {}/{} attempt {}/{}",
        event.line_index + 1,
        event.total_lines,
        event.attempt,
        event.max_attempts
    )
}

/// Program command implementation.
pub(crate) fn cmd_program(cli: &Cli, config: &Config, args: &ProgramArgs) -> Result<()> {
    let transfer = args.transfer_config(config);
    transfer.validate()?;

    let provider = ConfigurationProvider::new(
        ProviderOptions {
            port: cli.port.clone(),
            baud: cli.baud,
            hex: args.hex.clone(),
            reset_code: args.reset_code.clone(),
            non_interactive: cli.non_interactive,
        },
        config,
    );
    let resolved = provider.resolve()?;
    ensure_not_interrupted()?;

    if !cli.quiet {
        let source = resolved
            .image
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        eprintln!(
            "{} Loaded {} records from {}",
            style("📦").cyan(),
            resolved.image.len(),
            style(source).yellow()
        );
        eprintln!(
            "{} Using port {} @ {} baud",
            style("🔌").cyan(),
            style(&resolved.port).green(),
            resolved.baud
        );
    }

    let mut programmer = Programmer::open(&resolved.port, resolved.baud)
        .with_context(|| format!("Failed to open {}", resolved.port))?
        .with_config(transfer);

    if !cli.quiet {
        eprintln!(
            "{} Resetting node with code {} and waiting for the bootloader",
            style("⏳").yellow(),
            style(&resolved.reset_code).cyan()
        );
    }
    if let Err(err) = programmer.connect(&resolved.reset_code) {
        let _ = programmer.close();
        return Err(err.into());
    }
    if let Err(err) = ensure_not_interrupted() {
        let _ = programmer.close();
        return Err(err);
    }
    if !cli.quiet {
        eprintln!("{} Bootloader ready", style("✓").green());
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(resolved.image.len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = programmer.program(&resolved.image, &mut |event: &ProgressEvent| {
        pb.set_position(event.line_index as u64);
        pb.set_message(progress_message(event));
    });
    let _ = programmer.close();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            return Err(match err.line_index() {
                Some(index) => anyhow::Error::new(err)
                    .context(format!("Programming stopped at line {}", index + 1)),
                None => err.into(),
            });
        },
    };

    pb.set_position(report.lines_acked as u64);
    pb.finish_with_message("done");

    if !cli.quiet {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &TransferReport) {
    eprintln!(
        "\n{} Programmed {}/{} lines with {} writes in {:.1}s",
        style("🎉").green().bold(),
        report.lines_acked,
        report.lines_total,
        report.attempts_used,
        report.elapsed.as_secs_f64()
    );
    if report.finished_early {
        eprintln!(
            "{} Bootloader reported completion before the last line",
            style("ℹ").blue()
        );
    }
}
