use std::sync::{Mutex, PoisonError};

use crate::shared_types::{LetterCounts, LETTER_COUNT};
use crate::slice::PartialResult;

/// Merged statistics for a whole run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AggregateResult {
    pub(crate) counts: LetterCounts,
    pub(crate) sum: f64,
    /// Number of units whose partial result has been merged.
    pub(crate) merged_units: usize,
}

impl Default for AggregateResult {
    fn default() -> Self {
        Self {
            counts: [0; LETTER_COUNT],
            sum: 0.0,
            merged_units: 0,
        }
    }
}

impl AggregateResult {
    pub(crate) fn absorb(&mut self, partial: &PartialResult) {
        for (total, part) in self.counts.iter_mut().zip(partial.counts.iter()) {
            *total += part;
        }
        self.sum += partial.sum;
        self.merged_units += 1;
    }
}

/// In-process accumulator shared by reference between worker threads.
///
/// The lock is only taken by [`Accumulator::merge`], once per unit; scanning
/// happens outside it.
#[derive(Debug, Default)]
pub(crate) struct Accumulator {
    total: Mutex<AggregateResult>,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn merge(&self, partial: &PartialResult) {
        // merge is the only writer and cannot panic midway, so a poisoned
        // lock still guards a consistent value
        let mut total = self.total.lock().unwrap_or_else(PoisonError::into_inner);
        total.absorb(partial);
    }

    pub(crate) fn into_result(self) -> AggregateResult {
        self.total.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
