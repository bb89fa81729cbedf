#[macro_use]
extern crate log;

mod accumulator;
mod config;
mod error;
mod input;
mod partition;
#[cfg(unix)]
mod process_backend;
mod progress_reporter;
mod report;
mod shared_types;
#[cfg(unix)]
mod shm;
mod slice;
mod thread_backend;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressDrawTarget};
use indicatif_log_bridge::LogWrapper;
use log::SetLoggerError;

use config::{Backend, RunConfig};
use error::StatError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct CliArgs {
    /// Log debug details
    #[arg(short, long)]
    pub(crate) verbose: bool,

    /// Do not draw the progress bar
    #[arg(long)]
    pub(crate) no_progress: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Scan with one thread per slice inside this process
    Threads(Target),
    /// Scan with one forked child process per slice
    Processes(Target),
}

#[derive(Args, Debug)]
pub(crate) struct Target {
    /// File to scan
    pub(crate) path: PathBuf,

    /// Number of workers (defaults to the available parallelism)
    #[arg(allow_hyphen_values = true)]
    pub(crate) workers: Option<String>,
}

fn init_logging(verbose: bool, multi: &MultiProgress) -> Result<(), SetLoggerError> {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    // stdout carries the report
    let logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );
    LogWrapper::new(multi.clone(), *logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

fn run(config: &RunConfig, multi: &MultiProgress) -> Result<(), StatError> {
    info!(
        "scanning {} with {} workers on the {:?} backend",
        config.path.display(),
        config.workers,
        config.backend
    );
    let result = match config.backend {
        Backend::Threads => thread_backend::run(&config.path, config.workers, multi)?,
        #[cfg(unix)]
        Backend::Processes => process_backend::run(&config.path, config.workers, multi)?,
        #[cfg(not(unix))]
        Backend::Processes => {
            return Err(StatError::Usage(
                "the processes backend needs a unix platform".into(),
            ))
        }
    };

    report::write_report(&mut io::stdout().lock(), &result).map_err(|source| StatError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    })
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let multi = MultiProgress::new();
    if let Err(e) = init_logging(args.verbose, &multi) {
        eprintln!("failed to initialise logging: {e}");
    }

    let outcome = RunConfig::from_args(args).and_then(|config| {
        if !config.show_progress {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        run(&config, &multi)
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
