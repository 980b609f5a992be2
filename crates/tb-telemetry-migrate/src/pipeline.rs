//! Shared pipeline bookkeeping: run statistics and progress display.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Transfer statistics for one export or import run.
#[derive(Debug, Default, Clone)]
pub struct TransferStats {
    /// Devices processed.
    pub devices: u64,
    /// Keys processed, summed over devices (export only).
    pub keys: u64,
    /// Time windows walked, summed over devices (export only).
    pub windows: u64,
    /// Telemetry requests issued (export only).
    pub chunks: u64,
    /// Records written to the file or read from it.
    pub records: u64,
    /// Write requests issued or, on a dry run, planned (import only).
    pub batches: u64,
    /// Points dropped for falling outside their window (export only).
    pub dropped: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl TransferStats {
    /// Calculate throughput (records per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.records as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Spinner with a running record count. Hidden when `show` is false.
pub fn create_progress_bar(show: bool, prefix: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix} {pos} records ({per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
