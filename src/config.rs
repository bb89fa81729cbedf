use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;

use crate::error::StatError;
use crate::{CliArgs, Command};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Backend {
    Threads,
    Processes,
}

impl Backend {
    /// Worker count used when hardware parallelism cannot be detected.
    fn fallback_workers(self) -> usize {
        match self {
            Backend::Threads => 2,
            Backend::Processes => 1,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RunConfig {
    pub(crate) path: PathBuf,
    pub(crate) workers: usize,
    pub(crate) backend: Backend,
    pub(crate) show_progress: bool,
}

impl RunConfig {
    pub(crate) fn from_args(args: CliArgs) -> Result<Self, StatError> {
        let detected = thread::available_parallelism().ok();
        let (backend, target) = match args.command {
            Command::Threads(target) => (Backend::Threads, target),
            Command::Processes(target) => (Backend::Processes, target),
        };
        let workers = resolve_workers(backend, target.workers.as_deref(), detected)?;
        Ok(Self {
            path: target.path,
            workers,
            backend,
            show_progress: !args.no_progress,
        })
    }
}

/// Applies each backend's policy for the optional worker argument.
///
/// Threads take any positive integer and fall back to the detected default
/// otherwise; processes reject anything that is not a positive integer.
pub(crate) fn resolve_workers(
    backend: Backend,
    raw: Option<&str>,
    detected: Option<NonZeroUsize>,
) -> Result<usize, StatError> {
    let default = detected.map_or_else(|| backend.fallback_workers(), NonZeroUsize::get);
    let Some(raw) = raw else {
        return Ok(default);
    };

    match (backend, raw.trim().parse::<i64>()) {
        (_, Ok(n)) if n >= 1 => Ok(usize::try_from(n).unwrap_or(default)),
        (Backend::Threads, _) => {
            warn!("ignoring worker count {raw:?}, using {default}");
            Ok(default)
        }
        (Backend::Processes, _) => Err(StatError::Usage(format!(
            "invalid process count '{raw}', expected a positive integer"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    fn nz(n: usize) -> Option<NonZeroUsize> {
        NonZeroUsize::new(n)
    }

    #[rstest]
    #[case(Backend::Threads, None, nz(8), 8)]
    #[case(Backend::Threads, None, None, 2)]
    #[case(Backend::Processes, None, None, 1)]
    #[case(Backend::Threads, Some("4"), nz(8), 4)]
    #[case(Backend::Processes, Some("12"), nz(8), 12)]
    #[case(Backend::Threads, Some("0"), nz(6), 6)]
    #[case(Backend::Threads, Some("-3"), None, 2)]
    #[case(Backend::Threads, Some("many"), nz(3), 3)]
    #[case(Backend::Threads, Some("4x"), nz(3), 3)]
    fn resolves_worker_count(
        #[case] backend: Backend,
        #[case] raw: Option<&str>,
        #[case] detected: Option<NonZeroUsize>,
        #[case] expected: usize,
    ) {
        assert_eq!(resolve_workers(backend, raw, detected).unwrap(), expected);
    }

    #[rstest]
    #[case("0")]
    #[case("-1")]
    #[case("four")]
    #[case("4x")]
    fn process_backend_rejects_bad_counts(#[case] raw: &str) {
        let err = resolve_workers(Backend::Processes, Some(raw), nz(4)).unwrap_err();
        assert!(matches!(err, StatError::Usage(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn builds_config_from_command_line() {
        let args = CliArgs::try_parse_from(["bytestat", "--no-progress", "processes", "input.txt", "3"]).unwrap();
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.backend, Backend::Processes);
        assert_eq!(config.path, PathBuf::from("input.txt"));
        assert_eq!(config.workers, 3);
        assert!(!config.show_progress);
    }

    #[test]
    fn thread_subcommand_without_count_uses_default() {
        let args = CliArgs::try_parse_from(["bytestat", "threads", "input.txt"]).unwrap();
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.backend, Backend::Threads);
        assert!(config.workers >= 1);
        assert!(config.show_progress);
    }
}
