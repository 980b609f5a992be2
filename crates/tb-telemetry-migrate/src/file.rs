//! Telemetry file codec.
//!
//! One CSV row per point, with the header
//! `deviceId,key,ts,value,type,deviceName`. The trailing `deviceName` column
//! is optional on read so files without it still import.

use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{DeviceId, TelemetryRecord, TelemetryValue, ValueType};

/// Column names, in file order.
pub const HEADER: [&str; 6] = ["deviceId", "key", "ts", "value", "type", "deviceName"];

const IO_BUFFER: usize = 128 * 1024;

/// One serialized row.
#[derive(Debug, Serialize)]
pub struct TelemetryRow<'a> {
    /// Device id at export time.
    pub device_id: DeviceId,
    /// Telemetry key.
    pub key: &'a str,
    /// Epoch milliseconds.
    pub ts: i64,
    /// Value as text.
    pub value: String,
    /// How to read `value` back.
    pub value_type: ValueType,
    /// Device name at export time.
    pub device_name: Option<&'a str>,
}

impl<'a> From<&'a TelemetryRecord> for TelemetryRow<'a> {
    fn from(record: &'a TelemetryRecord) -> Self {
        Self {
            device_id: record.device_id,
            key: &record.key,
            ts: record.ts,
            value: record.value.encode(),
            value_type: record.value.value_type(),
            device_name: record.device_name.as_deref(),
        }
    }
}

/// Streaming row writer.
pub struct TelemetryWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl TelemetryWriter<BufWriter<File>> {
    /// Creates (or truncates) `path` and writes the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::with_capacity(IO_BUFFER, file))
    }
}

impl<W: Write> TelemetryWriter<W> {
    /// Wraps `inner` and writes the header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be encoded or written.
    pub fn write(&mut self, record: &TelemetryRecord) -> Result<()> {
        self.writer.serialize(TelemetryRow::from(record))?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, header excluded.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes buffered rows to the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| {
            Error::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    device_id: usize,
    key: usize,
    ts: usize,
    value: usize,
    value_type: usize,
    device_name: Option<usize>,
}

impl Columns {
    fn from_header(header: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| header.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::Parse {
                line: 1,
                message: format!("missing column '{}'", name),
            })
        };
        Ok(Self {
            device_id: require("deviceId")?,
            key: require("key")?,
            ts: require("ts")?,
            value: require("value")?,
            value_type: require("type")?,
            device_name: find("deviceName"),
        })
    }
}

/// Streaming row reader. Yields one [`TelemetryRecord`] per row.
pub struct TelemetryReader<R: Read> {
    reader: csv::Reader<R>,
    columns: Columns,
    record: csv::StringRecord,
}

impl TelemetryReader<BufReader<File>> {
    /// Opens `path` and reads its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or lacks a required column.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::with_capacity(IO_BUFFER, file))
    }
}

impl<R: Read> TelemetryReader<R> {
    /// Wraps `inner` and reads its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is unreadable or lacks a required column.
    pub fn new(inner: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(inner);
        let columns = Columns::from_header(reader.headers()?)?;
        Ok(Self {
            reader,
            columns,
            record: csv::StringRecord::new(),
        })
    }

    /// Reads the next record, `Ok(None)` at end of file.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] with the offending line for a malformed row.
    pub fn read_record(&mut self) -> Result<Option<TelemetryRecord>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        let line = self.record.position().map_or(0, csv::Position::line);
        parse_row(&self.record, &self.columns)
            .map(Some)
            .map_err(|message| Error::Parse { line, message })
    }
}

impl<R: Read> Iterator for TelemetryReader<R> {
    type Item = Result<TelemetryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

fn parse_row(
    record: &csv::StringRecord,
    columns: &Columns,
) -> std::result::Result<TelemetryRecord, String> {
    let field = |idx: usize, name: &str| {
        record
            .get(idx)
            .ok_or_else(|| format!("missing field '{}'", name))
    };

    let raw_id = field(columns.device_id, "deviceId")?;
    let device_id: DeviceId = raw_id
        .parse()
        .map_err(|e| format!("invalid deviceId '{}': {}", raw_id, e))?;

    let key = field(columns.key, "key")?;
    if key.is_empty() {
        return Err("empty key".to_string());
    }

    let raw_ts = field(columns.ts, "ts")?;
    let ts: i64 = raw_ts
        .trim()
        .parse()
        .map_err(|e| format!("invalid ts '{}': {}", raw_ts, e))?;

    let raw_type = field(columns.value_type, "type")?;
    let value_type: ValueType = raw_type
        .parse()
        .map_err(|_| format!("unknown type '{}'", raw_type))?;
    let value = TelemetryValue::decode(value_type, field(columns.value, "value")?)?;

    let device_name = columns
        .device_name
        .and_then(|idx| record.get(idx))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(TelemetryRecord {
        device_id,
        device_name,
        key: key.to_string(),
        ts,
        value,
    })
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
