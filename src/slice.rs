use crate::shared_types::{LetterCounts, LETTER_COUNT};

/// Statistics for one slice, owned by the unit that computed it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PartialResult {
    pub(crate) counts: LetterCounts,
    pub(crate) sum: f64,
}

impl Default for PartialResult {
    fn default() -> Self {
        Self {
            counts: [0; LETTER_COUNT],
            sum: 0.0,
        }
    }
}

/// Scans `bytes` once, summing `sqrt(b)` and counting ASCII letters
/// case-insensitively. Touches no shared state and never allocates, so it is
/// safe to run in a freshly forked child.
pub(crate) fn scan(bytes: &[u8]) -> PartialResult {
    let mut partial = PartialResult::default();
    for &b in bytes {
        partial.sum += f64::from(b).sqrt();
        let folded = b.to_ascii_lowercase();
        if folded.is_ascii_lowercase() {
            partial.counts[usize::from(folded - b'a')] += 1;
        }
    }
    partial
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(counts: &LetterCounts, c: u8) -> u64 {
        counts[usize::from(c - b'a')]
    }

    #[test]
    fn folds_case_and_ignores_digits() {
        let partial = scan(b"AaBbZz123");
        assert_eq!(letter(&partial.counts, b'a'), 2);
        assert_eq!(letter(&partial.counts, b'b'), 2);
        assert_eq!(letter(&partial.counts, b'z'), 2);
        assert_eq!(partial.counts.iter().sum::<u64>(), 6);

        let expected = [65u8, 97, 66, 98, 90, 122, 49, 50, 51]
            .iter()
            .fold(0.0, |acc, &b| acc + f64::from(b).sqrt());
        assert_eq!(partial.sum, expected);
    }

    #[test]
    fn bytes_around_the_letter_ranges_are_not_counted() {
        // '@' and '[' flank 'A'..='Z', '`' and '{' flank 'a'..='z'.
        let partial = scan(&[b'@', b'[', b'`', b'{', 0x00, 0xC1, 0xE1, 0xFF]);
        assert_eq!(partial.counts, [0; LETTER_COUNT]);
        assert!(partial.sum > 0.0);
    }

    #[test]
    fn empty_slice_is_zero() {
        assert_eq!(scan(&[]), PartialResult::default());
    }

    #[test]
    fn sum_covers_every_byte_value() {
        let all = (0..=255u8).collect::<Vec<_>>();
        let expected: f64 = (0..=255u32).map(|b| f64::from(b).sqrt()).sum();
        let partial = scan(&all);
        assert!((partial.sum - expected).abs() < 1e-9);
        assert!(partial.counts.iter().all(|&c| c == 2));
    }
}
