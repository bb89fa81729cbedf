use std::io::{self, Write};

use crate::accumulator::AggregateResult;

pub(crate) fn write_report<W: Write>(out: &mut W, result: &AggregateResult) -> io::Result<()> {
    for (letter, count) in (b'a'..=b'z').zip(result.counts.iter()) {
        writeln!(out, "{}: {}", char::from(letter), count)?;
    }
    writeln!(out, "sum of sqrt: {:.10}", result.sum)?;
    out.flush()
}
