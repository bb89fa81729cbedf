use crate::error::StatError;
use crate::shared_types::ByteRange;

/// Splits `[0, total_len)` into contiguous slices, one per worker.
///
/// The worker count is clamped to `total_len` so no slice is empty. The first
/// `total_len % workers` slices carry one extra byte, so slice lengths differ
/// by at most one.
pub(crate) fn split_ranges(total_len: usize, workers: usize) -> Result<Vec<ByteRange>, StatError> {
    if total_len == 0 {
        return Err(StatError::EmptyInput);
    }
    if workers == 0 {
        return Err(StatError::NoWorkers);
    }

    let workers = workers.min(total_len);
    let base = total_len / workers;
    let remainder = total_len % workers;

    let mut start = 0;
    let ranges = (0..workers)
        .map(|i| {
            let len = base + usize::from(i < remainder);
            let range = ByteRange {
                start,
                end: start + len,
            };
            start = range.end;
            range
        })
        .collect::<Vec<_>>();
    debug!(
        "split {total_len} bytes into {} slices of ~{base} bytes",
        ranges.len()
    );
    Ok(ranges)
}
