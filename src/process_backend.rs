use std::io;
use std::path::Path;
use std::sync::mpsc;

use indicatif::MultiProgress;

use crate::accumulator::AggregateResult;
use crate::error::StatError;
use crate::input;
use crate::partition::split_ranges;
use crate::progress_reporter::ProgressReporter;
use crate::shared_types::{ByteCount, ByteRange};
use crate::shm::SharedAccumulator;
use crate::slice;

/// Exit status of a child that could not take the result lock.
const EXIT_LOCK_FAILED: i32 = 3;
/// Exit status of a child handed a range outside the mapping.
const EXIT_BAD_RANGE: i32 = 4;

#[derive(Debug)]
struct Child {
    pid: libc::pid_t,
    index: usize,
    range: ByteRange,
}

#[derive(Debug, PartialEq, Eq)]
enum ChildOutcome {
    Merged,
    Exited(i32),
    Signaled(i32),
    WaitFailed(i32),
}

pub(crate) fn run(path: &Path, workers: usize, multi: &MultiProgress) -> Result<AggregateResult, StatError> {
    match input::map_readonly(path)? {
        Some(map) => run_on_mapping(&map, workers, multi),
        None => {
            info!("input is empty, nothing to schedule");
            Ok(AggregateResult::default())
        }
    }
}

/// Forks one child per slice of `bytes`. Children scan their slice of the
/// shared mapping and merge into the shared result block; the parent reaps
/// them all before reading the totals.
///
/// A child that is lost (failed wait, non-zero exit, killed by a signal) is
/// logged as a warning and the run still completes, so the returned counts
/// can fall short. `merged_units` tells how many slices made it in.
pub(crate) fn run_on_mapping(
    bytes: &[u8],
    workers: usize,
    multi: &MultiProgress,
) -> Result<AggregateResult, StatError> {
    if bytes.is_empty() {
        return Ok(AggregateResult::default());
    }
    let shared = SharedAccumulator::new()?;
    run_with_accumulator(bytes, workers, shared, multi)
}

fn run_with_accumulator(
    bytes: &[u8],
    workers: usize,
    shared: SharedAccumulator,
    multi: &MultiProgress,
) -> Result<AggregateResult, StatError> {
    let ranges = split_ranges(bytes.len(), workers)?;
    debug!("forking {} workers", ranges.len());

    let (tx_progress, rx_progress) = mpsc::channel::<ByteCount>();
    let reporter = ProgressReporter::new(rx_progress, ranges.len(), multi.clone()).spawn();

    let mut children = Vec::with_capacity(ranges.len());
    for (index, &range) in ranges.iter().enumerate() {
        // SAFETY: the child only scans memory and takes the process-shared
        // lock before calling _exit; it never returns into Rust code.
        match unsafe { libc::fork() } {
            -1 => {
                let err = io::Error::last_os_error();
                if children.is_empty() {
                    drop(tx_progress);
                    reporter.join().ok();
                    return Err(StatError::Spawn(err));
                }
                error!("fork for slice {index} failed, continuing with {} workers: {err}", children.len());
                break;
            }
            0 => child_main(bytes, range, &shared),
            pid => children.push(Child { pid, index, range }),
        }
    }

    // reaped in fork order, so the bar can lag behind a slow early child;
    // waitpid(-1) would also collect children this process forked elsewhere
    for child in &children {
        match reap(child.pid) {
            ChildOutcome::Merged => {
                tx_progress.send(child.range.len() as ByteCount).ok();
            }
            ChildOutcome::Exited(EXIT_LOCK_FAILED) => warn!(
                "worker {} (pid {}) could not take the result lock, slice {}..{} not counted",
                child.index, child.pid, child.range.start, child.range.end
            ),
            ChildOutcome::Exited(code) => warn!(
                "worker {} (pid {}) exited with status {code}",
                child.index, child.pid
            ),
            ChildOutcome::Signaled(signal) => warn!(
                "worker {} (pid {}) killed by signal {signal}",
                child.index, child.pid
            ),
            ChildOutcome::WaitFailed(errno) => warn!(
                "waiting for worker {} (pid {}) failed: {}",
                child.index,
                child.pid,
                io::Error::from_raw_os_error(errno)
            ),
        }
    }
    drop(tx_progress);
    if reporter.join().is_err() {
        warn!("progress reporter thread panicked");
    }

    let result = shared.into_result();
    if result.merged_units != ranges.len() {
        warn!(
            "only {} of {} slices were merged, counts are incomplete",
            result.merged_units,
            ranges.len()
        );
    }
    Ok(result)
}

fn child_main(bytes: &[u8], range: ByteRange, shared: &SharedAccumulator) -> ! {
    let code = match bytes.get(range.as_range()) {
        Some(slice) => {
            let partial = slice::scan(slice);
            match shared.merge(&partial) {
                Ok(()) => 0,
                Err(_) => EXIT_LOCK_FAILED,
            }
        }
        None => EXIT_BAD_RANGE,
    };
    // SAFETY: _exit skips destructors and atexit handlers that belong to the
    // parent's state.
    unsafe { libc::_exit(code) }
}

fn reap(pid: libc::pid_t) -> ChildOutcome {
    let mut status = 0;
    loop {
        // SAFETY: status is a valid out pointer.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc != -1 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return ChildOutcome::WaitFailed(err.raw_os_error().unwrap_or(0));
        }
    }

    if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            0 => ChildOutcome::Merged,
            code => ChildOutcome::Exited(code),
        }
    } else if libc::WIFSIGNALED(status) {
        ChildOutcome::Signaled(libc::WTERMSIG(status))
    } else {
        ChildOutcome::Exited(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn sample_file() -> (NamedTempFile, Vec<u8>) {
        let bytes = b"Pack my box with FIVE dozen liquor jugs; 42 \x00\x7f\xfe\n"
            .iter()
            .copied()
            .cycle()
            .take(20_011)
            .collect::<Vec<_>>();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        (file, bytes)
    }

    #[test]
    fn single_child_matches_sequential_scan() {
        let (file, bytes) = sample_file();
        let result = run(file.path(), 1, &hidden()).unwrap();
        let direct = slice::scan(&bytes);
        assert_eq!(result.counts, direct.counts);
        assert_eq!(result.sum, direct.sum);
        assert_eq!(result.merged_units, 1);
    }

    #[test]
    fn children_agree_with_threads() {
        let (file, bytes) = sample_file();
        let threaded = crate::thread_backend::run_on_buffer(&bytes, 3, &hidden()).unwrap();
        for workers in [2, 5, 16] {
            let forked = run(file.path(), workers, &hidden()).unwrap();
            assert_eq!(forked.counts, threaded.counts, "workers={workers}");
            assert!((forked.sum - threaded.sum).abs() < 1e-6, "workers={workers}");
            assert_eq!(forked.merged_units, workers);
        }
    }

    #[test]
    fn case_folding_through_the_mapping() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"AaBbZz123").unwrap();
        file.flush().unwrap();
        let result = run(file.path(), 1, &hidden()).unwrap();
        let expected_sum = [65u8, 97, 66, 98, 90, 122, 49, 50, 51]
            .iter()
            .fold(0.0, |acc, &b| acc + f64::from(b).sqrt());
        assert_eq!(result.counts[0], 2);
        assert_eq!(result.counts[1], 2);
        assert_eq!(result.counts[25], 2);
        assert_eq!(result.counts.iter().sum::<u64>(), 6);
        assert_eq!(result.sum, expected_sum);
    }

    #[test]
    fn empty_file_forks_nothing() {
        let file = NamedTempFile::new().unwrap();
        let result = run(file.path(), 8, &hidden()).unwrap();
        assert_eq!(result, AggregateResult::default());
    }

    #[test]
    fn missing_file_fails_before_forking() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("absent"), 2, &hidden()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn waiting_on_a_stranger_is_reported_not_fatal() {
        // pid 1 is never our child
        assert_eq!(reap(1), ChildOutcome::WaitFailed(libc::ECHILD));
    }

    #[test]
    fn reap_decodes_exit_status() {
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed"),
            0 => unsafe { libc::_exit(EXIT_LOCK_FAILED) },
            pid => assert_eq!(reap(pid), ChildOutcome::Exited(EXIT_LOCK_FAILED)),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dead_lock_holder_undercounts_but_completes() {
        let (_file, bytes) = sample_file();
        let shared = SharedAccumulator::new().unwrap();
        shared.abandon_lock_in_child();

        let result = run_with_accumulator(&bytes, 4, shared, &hidden()).unwrap();
        assert!(result.merged_units < 4);
        assert_eq!(result.merged_units, 0);
        assert_eq!(result.counts, [0; crate::shared_types::LETTER_COUNT]);
    }
}
