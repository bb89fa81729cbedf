use std::path::Path;
use std::sync::mpsc;
use std::thread;

use indicatif::MultiProgress;

use crate::accumulator::{Accumulator, AggregateResult};
use crate::error::StatError;
use crate::input;
use crate::partition::split_ranges;
use crate::progress_reporter::ProgressReporter;
use crate::shared_types::{ByteCount, ByteRange};
use crate::slice;

pub(crate) fn run(path: &Path, workers: usize, multi: &MultiProgress) -> Result<AggregateResult, StatError> {
    let bytes = input::read_all(path)?;
    run_on_buffer(&bytes, workers, multi)
}

/// Scans `bytes` with one scoped thread per slice. Each thread scans its
/// slice into a local result and merges it into the shared accumulator once.
pub(crate) fn run_on_buffer(
    bytes: &[u8],
    workers: usize,
    multi: &MultiProgress,
) -> Result<AggregateResult, StatError> {
    if bytes.is_empty() {
        info!("input is empty, nothing to schedule");
        return Ok(AggregateResult::default());
    }

    let ranges = split_ranges(bytes.len(), workers)?;
    debug!("scanning with {} threads", ranges.len());

    let accumulator = Accumulator::new();
    let (tx_progress, rx_progress) = mpsc::channel::<ByteCount>();
    let reporter = ProgressReporter::new(rx_progress, ranges.len(), multi.clone()).spawn();

    let outcome = thread::scope(|s| {
        let mut handles = Vec::with_capacity(ranges.len());
        for (index, &range) in ranges.iter().enumerate() {
            let spawned = spawn_slice_worker(s, index, bytes, range, &accumulator, tx_progress.clone());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // already spawned threads are joined by the scope
                    error!("could not spawn thread for slice {index}: {e}");
                    return Err(e);
                }
            }
        }

        let mut first_panic = None;
        for (index, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!("thread for slice {index} panicked");
                first_panic.get_or_insert(index);
            }
        }
        match first_panic {
            Some(index) => Err(StatError::WorkerPanicked { index }),
            None => Ok(()),
        }
    });
    drop(tx_progress);
    if reporter.join().is_err() {
        warn!("progress reporter thread panicked");
    }
    outcome?;

    let result = accumulator.into_result();
    if result.merged_units != ranges.len() {
        warn!(
            "only {} of {} slices were merged, counts are incomplete",
            result.merged_units,
            ranges.len()
        );
    }
    Ok(result)
}

fn spawn_slice_worker<'scope, 'env>(
    scope: &'scope thread::Scope<'scope, 'env>,
    index: usize,
    bytes: &'env [u8],
    range: ByteRange,
    accumulator: &'env Accumulator,
    tx_progress: mpsc::Sender<ByteCount>,
) -> Result<thread::ScopedJoinHandle<'scope, ()>, StatError> {
    thread::Builder::new()
        .name(format!("slice-{index}"))
        .spawn_scoped(scope, move || {
            let partial = slice::scan(&bytes[range.as_range()]);
            accumulator.merge(&partial);
            tx_progress.send(range.len() as ByteCount).ok();
        })
        .map_err(StatError::Spawn)
}
