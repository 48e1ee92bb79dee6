mod commands;
mod exit_codes;
mod logging;
mod progress;
mod summary;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use commands::Cli;
use dotenv::dotenv;
use exit_codes::ExitCode;
use progress::CliReporter;
use relinkdest_core::config::load_configuration;
use relinkdest_core::{ReconcileEngine, SnapshotPair};
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let cli = Cli::parse();
    let guard = logging::init_logger(cli.verbose, cli.quiet, cli.log_file.as_deref());

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FatalError
        }
    };

    // process::exit skips destructors; flush the file appender first.
    drop(guard);
    process::exit(exit_code.code());
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let file_config =
        load_configuration(cli.config.as_deref()).context("Error loading configuration")?;
    let policy = file_config.overlay(cli.file_config()).resolve()?;

    if cli.show_config {
        print!("{}", summary::render_policy(&policy));
        return Ok(ExitCode::Success);
    }

    let (Some(older), Some(newer)) = (&cli.older, &cli.newer) else {
        bail!("both the older and the newer snapshot root are required");
    };

    let engine = ReconcileEngine::new(SnapshotPair::new(older, newer), policy);
    let cancel = engine.cancel_token();
    ctrlc::set_handler(move || eprintln!("\n{}", request_cancel(&cancel)))
        .context("cannot install Ctrl-C handler")?;

    let reporter = CliReporter::new(cli.show_progress(), cli.csv.as_deref())?;
    let report = engine.run(&reporter)?;
    let csv_result = reporter.finish();

    println!();
    print!("{}", summary::render_report(&report));
    info!("Run finished with status {:?}", report.status());

    if let Err(err) = &csv_result {
        warn!("CSV event log incomplete: {:#}", err);
        eprintln!("{} {:#}", "warning:".yellow().bold(), err);
    }
    Ok(ExitCode::for_run(report.status(), csv_result.is_err()))
}

/// Ctrl-C only raises the cancel flag. The engine stops between paths, so a
/// pair that is being linked is always renamed into place first.
fn request_cancel(cancel: &AtomicBool) -> &'static str {
    if cancel.swap(true, Ordering::SeqCst) {
        "Already stopping; waiting for the current path to finish"
    } else {
        "Interrupted, stopping after the current path"
    }
}
