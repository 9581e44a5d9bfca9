//! Throughput reporting for the pipeline writer stage.
//!
//! Reports are advisory. A reporter must never block the transfer.

use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use tracing::debug;

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Bytes written so far.
    pub total_bytes: u64,
    /// Bytes per second since the previous observation.
    pub rate: f64,
    /// Time since the transfer started.
    pub elapsed: Duration,
}

/// Final numbers for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Total bytes written to the sink.
    pub bytes: u64,
    pub elapsed: Duration,
    /// Buffer allocations for this run, including any regrowth.
    pub buffers_allocated: usize,
    /// Most buffers held outside the free queue at once.
    pub peak_in_flight: usize,
    /// Largest buffer capacity seen during the run.
    pub largest_buffer: usize,
}

impl TransferStats {
    /// Average bytes per second over the whole run.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

pub trait ProgressReporter: Send {
    fn update(&mut self, progress: &Progress);

    fn finish(&mut self, _stats: &TransferStats) {}
}

/// Discards all observations.
#[derive(Debug, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn update(&mut self, _progress: &Progress) {}
}

/// Emits observations as debug events. Used where stderr belongs to a log.
#[derive(Debug)]
pub struct LogReporter {
    label: &'static str,
}

impl LogReporter {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl ProgressReporter for LogReporter {
    fn update(&mut self, progress: &Progress) {
        debug!(
            "{} {} ({}/s)",
            self.label,
            HumanBytes(progress.total_bytes),
            HumanBytes(progress.rate as u64)
        );
    }
}

/// Spinner on stderr showing bytes sent and current rate.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner} {prefix} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(label.to_string());
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn update(&mut self, progress: &Progress) {
        self.bar.set_message(format!(
            "{:>10}  {:>10}/s",
            HumanBytes(progress.total_bytes).to_string(),
            HumanBytes(progress.rate as u64).to_string()
        ));
        self.bar.tick();
    }

    fn finish(&mut self, _stats: &TransferStats) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_rate() {
        let stats = TransferStats {
            bytes: 4096,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.rate(), 2048.0);
        assert_eq!(TransferStats::default().rate(), 0.0);
    }

    #[test]
    fn test_hidden_bar_accepts_updates() {
        let mut bar = BarReporter {
            bar: ProgressBar::hidden(),
        };
        bar.update(&Progress {
            total_bytes: 10,
            rate: 5.0,
            elapsed: Duration::from_secs(2),
        });
        bar.finish(&TransferStats::default());
        assert!(bar.bar.is_finished());
    }
}
