use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use crate::shared_types::ByteCount;

/// Consumes one message per finished slice (its length in bytes) and draws a
/// bar over the scheduled slices.
pub(crate) struct ProgressReporter {
    rx_progress: mpsc::Receiver<ByteCount>,
    total_units: usize,
    multi_progress: MultiProgress,
}

impl ProgressReporter {
    pub(crate) fn new(
        rx_progress: mpsc::Receiver<ByteCount>,
        total_units: usize,
        multi_progress: MultiProgress,
    ) -> Self {
        Self {
            rx_progress,
            total_units,
            multi_progress,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        spawn_progress_reporter(self.total_units, self.rx_progress, self.multi_progress)
    }
}

fn format_speed(bytes: ByteCount, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return String::from("-");
    }
    let speed = bytes as f64 / secs;
    let (unit, speed) = if speed > 1024.0 * 1024.0 {
        ("MB/s", speed / (1024.0 * 1024.0))
    } else {
        ("kB/s", speed / 1024.0)
    };
    format!("{:.1} {}", speed, unit)
}

pub(crate) fn spawn_progress_reporter(
    total_units: usize,
    rx_progress: mpsc::Receiver<ByteCount>,
    multi: MultiProgress,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let pb = multi.add(ProgressBar::new(total_units as u64));
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} slices ({eta}) ({msg})",
        )
        .map(|style| {
            style
                .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                })
                .progress_chars("#>-")
        })
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);

        let mut scanned: ByteCount = 0;
        while let Ok(slice_len) = rx_progress.recv() {
            scanned += slice_len;
            pb.inc(1);
            pb.set_message(format_speed(scanned, pb.elapsed()));
        }
        pb.finish_with_message(format!("({})", format_speed(scanned, pb.elapsed())));
    })
}
