//! Export pipeline: devices → time windows → bounded pages → file.

use indicatif::ProgressBar;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{TelemetryApi, TelemetryQuery};
use crate::config::ExportOptions;
use crate::error::{Error, Result};
use crate::file::TelemetryWriter;
use crate::model::{Device, TelemetryRecord};
use crate::pipeline::{create_progress_bar, TransferStats};
use crate::resolver::DeviceResolver;
use crate::retry::RetryPolicy;
use crate::window::{TimeWindow, TimeWindows};

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    /// Device names, resolved in order.
    pub device_names: Vec<String>,
    /// Keys to export. `None` exports every key each device has.
    pub keys: Option<Vec<String>>,
    /// Inclusive start, epoch ms.
    pub start_ts: i64,
    /// Exclusive end, epoch ms.
    pub end_ts: i64,
}

impl ExportRequest {
    /// Checks the time range and device list.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty range or an empty device list.
    pub fn validate(&self) -> Result<()> {
        if self.start_ts >= self.end_ts {
            return Err(Error::Config(format!(
                "startTs ({}) must be lower than endTs ({})",
                self.start_ts, self.end_ts
            )));
        }
        if self.device_names.iter().all(|n| n.trim().is_empty()) {
            return Err(Error::Config("no device names given".to_string()));
        }
        if let Some(keys) = &self.keys {
            if keys.iter().all(|k| k.trim().is_empty()) {
                return Err(Error::Config("keys given but all blank".to_string()));
            }
        }
        Ok(())
    }
}

/// Walks each device's telemetry window by window and appends it to a file.
pub struct Exporter<'a> {
    api: &'a dyn TelemetryApi,
    retry: RetryPolicy,
    options: ExportOptions,
    show_progress: bool,
}

impl<'a> Exporter<'a> {
    /// Creates an exporter. Progress display is off by default.
    pub fn new(api: &'a dyn TelemetryApi, retry: RetryPolicy, options: ExportOptions) -> Self {
        Self {
            api,
            retry,
            options,
            show_progress: false,
        }
    }

    /// Shows a spinner while exporting.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Exports into a new file at `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// See [`Exporter::export`]. Rows written before a failure stay in the file.
    pub async fn export_to_file(
        &self,
        resolver: &mut DeviceResolver<'_>,
        request: &ExportRequest,
        path: &Path,
    ) -> Result<TransferStats> {
        request.validate()?;
        let mut writer = TelemetryWriter::create(path)?;
        let result = self.export(resolver, request, &mut writer).await;
        let stats = finish_output(&mut writer, result)?;
        info!("Wrote {} rows to {}", writer.rows(), path.display());
        Ok(stats)
    }

    /// Exports every requested device into `writer`.
    ///
    /// All devices are resolved before the first row is written, so an
    /// unknown name leaves the output empty.
    ///
    /// # Errors
    ///
    /// Fails on an invalid request, an unknown device, a non-transient API
    /// error, retry exhaustion or a write error. Nothing is rolled back.
    pub async fn export<W: Write>(
        &self,
        resolver: &mut DeviceResolver<'_>,
        request: &ExportRequest,
        writer: &mut TelemetryWriter<W>,
    ) -> Result<TransferStats> {
        request.validate()?;
        if self.options.chunk_limit == 0 || self.options.time_limit_minutes == 0 {
            return Err(Error::Config(
                "chunk_limit and time_limit must be greater than 0".to_string(),
            ));
        }

        let start = Instant::now();
        let mut stats = TransferStats::default();

        let devices = resolver.resolve_all(&request.device_names).await?;
        info!(
            "Exporting {} device(s) from {} over [{}, {}) in {}-minute windows",
            devices.len(),
            self.api.api_name(),
            request.start_ts,
            request.end_ts,
            self.options.time_limit_minutes
        );

        let progress = create_progress_bar(self.show_progress, "export");

        for device in &devices {
            progress.set_message(device.name.clone());
            let keys = self.keys_for(device, request.keys.as_deref()).await?;
            if keys.is_empty() {
                warn!("Device '{}' has no timeseries keys, skipping", device.name);
                stats.devices += 1;
                continue;
            }
            info!(
                "Exporting device '{}' ({}): {} key(s)",
                device.name,
                device.id,
                keys.len()
            );

            let before = stats.records;
            let windows =
                TimeWindows::minutes(request.start_ts, request.end_ts, self.options.time_limit_minutes);
            for window in windows {
                for key in &keys {
                    self.export_window(device, key, window, writer, &mut stats, &progress)
                        .await?;
                }
                writer.flush()?;
                stats.windows += 1;
            }

            stats.devices += 1;
            stats.keys += keys.len() as u64;
            info!(
                "Device '{}': {} records exported",
                device.name,
                stats.records - before
            );
        }

        progress.finish_and_clear();
        stats.duration_secs = start.elapsed().as_secs_f64();

        info!(
            "Export complete: {} devices, {} windows, {} chunks, {} records in {:.2}s ({:.0} rec/sec)",
            stats.devices,
            stats.windows,
            stats.chunks,
            stats.records,
            stats.duration_secs,
            stats.throughput()
        );

        Ok(stats)
    }

    /// The requested keys, or every key the device has.
    async fn keys_for(&self, device: &Device, requested: Option<&[String]>) -> Result<Vec<String>> {
        let raw = match requested {
            Some(keys) => keys.to_vec(),
            None => {
                let api = self.api;
                let id = device.id;
                self.retry
                    .run("timeseries_keys", move || api.timeseries_keys(id))
                    .await?
            }
        };

        let mut keys: Vec<String> = Vec::with_capacity(raw.len());
        for key in raw {
            let key = key.trim();
            if !key.is_empty() && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Pages through one key of one device inside `window`.
    ///
    /// The cursor moves to the last written timestamp + 1. Paging stops on a
    /// short page, when the cursor reaches the window end, or when a full page
    /// carries nothing inside the window.
    async fn export_window<W: Write>(
        &self,
        device: &Device,
        key: &str,
        window: TimeWindow,
        writer: &mut TelemetryWriter<W>,
        stats: &mut TransferStats,
        progress: &ProgressBar,
    ) -> Result<()> {
        let api = self.api;
        let limit = self.options.chunk_limit;
        let mut cursor = window.start;

        while cursor < window.end {
            let query = TelemetryQuery {
                device: device.id,
                keys: vec![key.to_string()],
                start_ts: cursor,
                end_ts: window.end,
                limit,
            };
            let q = &query;
            let mut page = self
                .retry
                .run("get_telemetry", move || api.get_telemetry(q))
                .await?;
            stats.chunks += 1;

            let mut points = page.remove(key).unwrap_or_default();
            let returned = points.len();
            points.sort_by_key(|p| p.ts);

            let mut last_ts: Option<i64> = None;
            for point in points {
                if !window.contains(point.ts) || point.ts < cursor {
                    debug!(
                        "Dropping {}/{} point at {} outside [{}, {})",
                        device.name, key, point.ts, cursor, window.end
                    );
                    stats.dropped += 1;
                    continue;
                }
                if last_ts == Some(point.ts) {
                    continue;
                }
                writer.write(&TelemetryRecord {
                    device_id: device.id,
                    device_name: Some(device.name.clone()),
                    key: key.to_string(),
                    ts: point.ts,
                    value: point.value,
                })?;
                stats.records += 1;
                progress.inc(1);
                last_ts = Some(point.ts);
            }

            if returned < limit {
                break;
            }
            match last_ts {
                Some(ts) => cursor = ts.saturating_add(1),
                None => {
                    warn!(
                        "Full page for {}/{} had no points inside [{}, {}), moving to next window",
                        device.name, key, cursor, window.end
                    );
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Flushes `writer` once an export has ended.
///
/// The export's own error wins over a failed flush of the partial output.
fn finish_output<W: Write>(
    writer: &mut TelemetryWriter<W>,
    result: Result<TransferStats>,
) -> Result<TransferStats> {
    match result {
        Ok(stats) => {
            writer.flush()?;
            Ok(stats)
        }
        Err(e) => {
            if let Err(flush_error) = writer.flush() {
                warn!("Failed to flush partial output: {}", flush_error);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
#[path = "export_tests.rs"]
mod tests;
