// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # ThingsBoard Telemetry Migration Tool
//!
//! `tb-telemetry-migrate` is a CLI tool and library for moving device
//! telemetry between ThingsBoard instances or tenants through a flat file.
//!
//! ## Pipelines
//!
//! | Step | What it does |
//! |------|--------------|
//! | Resolve | Device names → device ids, once per run |
//! | Export | Per device and key: fixed time windows, bounded pages, CSV rows |
//! | Import | CSV rows → per-device batches grouped by timestamp → write API |
//!
//! Every API call goes through a [`RetryPolicy`]: transient failures
//! (timeouts, 429, 5xx) are retried with exponential backoff, everything else
//! aborts the run.
//!
//! ## Quick Start
//!
//! ```bash
//! # Export two devices for the first two hours of 2024
//! tb-telemetry-migrate export --host https://tb.example.com \
//!     --username tenant@example.com --password secret \
//!     --fileName telemetry.csv --startTs 1704067200000 --endTs 1704074400000 \
//!     --deviceNames 'Boiler 1,Boiler 2'
//!
//! # Import into another tenant
//! tb-telemetry-migrate import --host https://tb2.example.com \
//!     --username tenant@example.com --password secret --fileName telemetry.csv
//! ```
//!
//! ## Settings File
//!
//! ```yaml
//! connection:
//!   host: https://tb.example.com
//!   username: tenant@example.com
//!   password: secret
//!
//! retry:
//!   max_attempts: 5
//!
//! export:
//!   chunk_limit: 1024
//!   time_limit_minutes: 60
//!
//! import:
//!   batch_size: 500
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod file;
pub mod import;
pub mod model;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod window;

pub use api::{TelemetryApi, TelemetryQuery, ThingsboardClient};
pub use config::{ConnectionConfig, ExportOptions, ImportOptions, MigrationConfig};
pub use error::{Error, Result};
pub use export::{ExportRequest, Exporter};
pub use file::{TelemetryReader, TelemetryWriter};
pub use import::Importer;
pub use model::{DataPoint, Device, DeviceId, TelemetryRecord, TelemetryValue, TsValues, ValueType};
pub use pipeline::TransferStats;
pub use resolver::DeviceResolver;
pub use retry::RetryPolicy;
pub use window::{TimeWindow, TimeWindows};
