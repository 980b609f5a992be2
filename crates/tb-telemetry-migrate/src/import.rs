//! Import pipeline: file → per-device batches → telemetry write API.

use indicatif::ProgressBar;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::api::TelemetryApi;
use crate::config::ImportOptions;
use crate::error::{Error, Result};
use crate::file::TelemetryReader;
use crate::model::{DeviceId, TelemetryRecord, TsValues};
use crate::pipeline::{create_progress_bar, TransferStats};
use crate::resolver::DeviceResolver;
use crate::retry::RetryPolicy;

/// The device rows are currently being collected for.
struct Target {
    source_id: DeviceId,
    source_name: Option<String>,
    /// Where the rows go. Unset on a dry run.
    id: Option<DeviceId>,
    entries: u64,
}

impl Target {
    fn matches(&self, record: &TelemetryRecord) -> bool {
        self.source_id == record.device_id && self.source_name == record.device_name
    }

    fn label(&self) -> String {
        match &self.source_name {
            Some(name) => name.clone(),
            None => self.source_id.to_string(),
        }
    }
}

/// Streams a telemetry file into the write API, one device batch at a time.
pub struct Importer<'a> {
    api: &'a dyn TelemetryApi,
    retry: RetryPolicy,
    options: ImportOptions,
    show_progress: bool,
}

impl<'a> Importer<'a> {
    /// Creates an importer. Progress display is off by default.
    pub fn new(api: &'a dyn TelemetryApi, retry: RetryPolicy, options: ImportOptions) -> Self {
        Self {
            api,
            retry,
            options,
            show_progress: false,
        }
    }

    /// Shows a spinner while importing.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Imports the file at `path`.
    ///
    /// # Errors
    ///
    /// See [`Importer::import`].
    pub async fn import_file(
        &self,
        resolver: &mut DeviceResolver<'_>,
        path: &Path,
    ) -> Result<TransferStats> {
        info!("Importing telemetry from {}", path.display());
        let reader = TelemetryReader::open(path)?;
        self.import(resolver, reader).await
    }

    /// Imports every row of `reader`.
    ///
    /// Rows are buffered up to `batch_size` entries and written when the
    /// buffer fills, when the device changes, and at end of file. Each batch
    /// is grouped by timestamp in ascending order. Rows carrying a device
    /// name are re-resolved in the target; rows without one go to the
    /// recorded device id.
    ///
    /// # Errors
    ///
    /// Fails on a malformed row, an unknown device, a non-transient API error
    /// or retry exhaustion. Batches already written stay written.
    pub async fn import<R: Read>(
        &self,
        resolver: &mut DeviceResolver<'_>,
        reader: TelemetryReader<R>,
    ) -> Result<TransferStats> {
        if self.options.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.options.dry_run {
            info!("Dry run mode - not writing to {}", self.api.api_name());
        }

        let start = Instant::now();
        let mut stats = TransferStats::default();
        let mut seen: HashSet<(DeviceId, Option<String>)> = HashSet::new();
        let progress = create_progress_bar(self.show_progress, "import");

        let mut buffer: Vec<TelemetryRecord> = Vec::with_capacity(self.options.batch_size);
        let mut current: Option<Target> = None;

        for record in reader {
            let record = record?;

            let switch = current.as_ref().is_none_or(|t| !t.matches(&record));
            if switch {
                if let Some(mut target) = current.take() {
                    self.flush(&mut target, &mut buffer, &mut stats, &progress)
                        .await?;
                    finish(&target);
                }
                if seen.insert((record.device_id, record.device_name.clone())) {
                    stats.devices += 1;
                }
                current = Some(self.target_for(resolver, &record).await?);
            }

            buffer.push(record);
            if buffer.len() >= self.options.batch_size {
                if let Some(target) = current.as_mut() {
                    self.flush(target, &mut buffer, &mut stats, &progress)
                        .await?;
                }
            }
        }

        if let Some(mut target) = current.take() {
            self.flush(&mut target, &mut buffer, &mut stats, &progress)
                .await?;
            finish(&target);
        }

        progress.finish_and_clear();
        stats.duration_secs = start.elapsed().as_secs_f64();

        info!(
            "Import {}: {} devices, {} batches, {} records in {:.2}s ({:.0} rec/sec)",
            if self.options.dry_run {
                "dry run complete"
            } else {
                "complete"
            },
            stats.devices,
            stats.batches,
            stats.records,
            stats.duration_secs,
            stats.throughput()
        );

        Ok(stats)
    }

    async fn target_for(
        &self,
        resolver: &mut DeviceResolver<'_>,
        record: &TelemetryRecord,
    ) -> Result<Target> {
        let id = if self.options.dry_run {
            None
        } else {
            match &record.device_name {
                Some(name) => Some(resolver.resolve(name).await?),
                None => {
                    debug!(
                        "Row has no device name, writing to recorded id {}",
                        record.device_id
                    );
                    Some(record.device_id)
                }
            }
        };

        let target = Target {
            source_id: record.device_id,
            source_name: record.device_name.clone(),
            id,
            entries: 0,
        };
        match target.id {
            Some(id) if id != target.source_id => {
                info!("Importing device '{}' as {}", target.label(), id)
            }
            _ => info!("Importing device '{}'", target.label()),
        }
        Ok(target)
    }

    /// Writes the buffered rows of `target` as one batch and empties the buffer.
    async fn flush(
        &self,
        target: &mut Target,
        buffer: &mut Vec<TelemetryRecord>,
        stats: &mut TransferStats,
        progress: &ProgressBar,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let entries = TsValues::group(buffer.iter().map(|r| (r.key.as_str(), r.ts, &r.value)));
        match target.id {
            Some(id) => {
                let api = self.api;
                let batch = entries.as_slice();
                self.retry
                    .run("save_telemetry", move || api.save_telemetry(id, batch))
                    .await?;
            }
            None => debug!(
                "Dry run: would write {} entries at {} timestamps for '{}'",
                buffer.len(),
                entries.len(),
                target.label()
            ),
        }

        let written = buffer.len() as u64;
        let interval = self.options.log_interval.max(1);
        let before = target.entries;
        target.entries += written;
        if before / interval != target.entries / interval {
            info!(
                "Imported {} entries for device '{}'",
                target.entries,
                target.label()
            );
        }

        stats.batches += 1;
        stats.records += written;
        progress.inc(written);
        buffer.clear();
        Ok(())
    }
}

fn finish(target: &Target) {
    info!(
        "Device '{}': {} entries imported",
        target.label(),
        target.entries
    );
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod tests;
