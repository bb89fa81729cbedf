use std::ops::Range;

pub(crate) const LETTER_COUNT: usize = 26;

pub(crate) type LetterCounts = [u64; LETTER_COUNT];

/// Half-open byte range `[start, end)` into the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl ByteRange {
    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }

    pub(crate) fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

pub(crate) type ByteCount = u64;
