//! Telemetry API seam and its ThingsBoard implementation.

pub mod common;
#[cfg(test)]
pub(crate) mod memory;
pub mod thingsboard;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{DataPoint, Device, DeviceId, TsValues};

pub use thingsboard::ThingsboardClient;

/// Points per key returned by one telemetry read.
pub type TimeseriesPage = BTreeMap<String, Vec<DataPoint>>;

/// One bounded telemetry read over `[start_ts, end_ts)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryQuery {
    /// Device to read from.
    pub device: DeviceId,
    /// Keys to read.
    pub keys: Vec<String>,
    /// Inclusive start, epoch ms.
    pub start_ts: i64,
    /// Exclusive end, epoch ms.
    pub end_ts: i64,
    /// Maximum points returned per key.
    pub limit: usize,
}

/// Operations the pipelines need from a telemetry backend.
///
/// Implementations perform exactly one remote call per method; retrying is
/// left to the caller's [`crate::retry::RetryPolicy`].
#[async_trait]
pub trait TelemetryApi: Send + Sync {
    /// Short backend name for logs.
    fn api_name(&self) -> &'static str;

    /// Looks a device up by exact name. `Ok(None)` if it does not exist.
    async fn find_device(&self, name: &str) -> Result<Option<Device>>;

    /// Lists every timeseries key the device has reported.
    async fn timeseries_keys(&self, device: DeviceId) -> Result<Vec<String>>;

    /// Reads one page of raw points, ascending by timestamp.
    async fn get_telemetry(&self, query: &TelemetryQuery) -> Result<TimeseriesPage>;

    /// Writes timestamped values to a device. Existing values with the same
    /// key and timestamp are overwritten.
    async fn save_telemetry(&self, device: DeviceId, entries: &[TsValues]) -> Result<()>;
}
