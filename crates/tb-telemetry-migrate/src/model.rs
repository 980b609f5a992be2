//! Devices, telemetry values and write payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// ThingsBoard device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub Uuid);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A device resolved by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Human-readable device name, unique within a tenant.
    pub name: String,
    /// Stable identifier.
    pub id: DeviceId,
}

/// Value type recorded next to every exported value.
///
/// The serialized names are the ones written to the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// `true` / `false`.
    Boolean,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Double,
    /// Free text.
    String,
    /// JSON object or array.
    Json,
}

impl ValueType {
    /// Column spelling of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Double => "double",
            Self::String => "string",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "int" | "long" => Ok(Self::Int),
            "double" => Ok(Self::Double),
            "string" | "str" => Ok(Self::String),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!("unknown value type '{other}'"))),
        }
    }
}

/// A single typed telemetry value.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
    /// Text value.
    String(String),
    /// Structured JSON value.
    Json(serde_json::Value),
}

impl TelemetryValue {
    /// Returns the value's type tag.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Boolean(_) => ValueType::Boolean,
            Self::Int(_) => ValueType::Int,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::Json(_) => ValueType::Json,
        }
    }

    /// Converts a value returned by the API with strict data types.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }

    /// Guesses the type of a value the API returned as text.
    ///
    /// Order: boolean, integer, finite float, JSON object/array, string.
    /// JSON written with single quotes is accepted.
    pub fn infer(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("true") {
            return Self::Boolean(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Boolean(false);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return Self::Double(f);
            }
        }
        match parse_json_lenient(raw) {
            Some(json) if json.is_object() || json.is_array() => Self::Json(json),
            _ => Self::String(raw.to_string()),
        }
    }

    /// Text form written to the `value` column.
    pub fn encode(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Double(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    /// Parses the `value` column according to its `type` column.
    pub fn decode(value_type: ValueType, raw: &str) -> std::result::Result<Self, String> {
        match value_type {
            ValueType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(format!("'{raw}' is not a boolean")),
            },
            ValueType::Int => raw
                .trim()
                .parse()
                .map(Self::Int)
                .map_err(|e| format!("'{raw}' is not an integer: {e}")),
            ValueType::Double => match raw.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Self::Double(f)),
                Ok(_) => Err(format!("'{raw}' is not a finite number")),
                Err(e) => Err(format!("'{raw}' is not a number: {e}")),
            },
            ValueType::String => Ok(Self::String(raw.to_string())),
            ValueType::Json => parse_json_lenient(raw)
                .map(Self::Json)
                .ok_or_else(|| format!("'{raw}' is not valid JSON")),
        }
    }

    /// JSON form sent to the write API.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Double(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Json(v) => v.clone(),
        }
    }
}

/// Parses JSON, falling back to swapping single quotes for double quotes.
fn parse_json_lenient(raw: &str) -> Option<serde_json::Value> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| serde_json::from_str(&raw.replace('\'', "\"")).ok())
}

/// One timestamped value as returned by the read API.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Epoch milliseconds.
    pub ts: i64,
    /// The value.
    pub value: TelemetryValue,
}

/// A normalized telemetry row, as exported and imported.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Device the value belongs to.
    pub device_id: DeviceId,
    /// Device name at export time, if known.
    pub device_name: Option<String>,
    /// Telemetry key.
    pub key: String,
    /// Epoch milliseconds.
    pub ts: i64,
    /// The value.
    pub value: TelemetryValue,
}

/// Write payload entry: all values of one device sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TsValues {
    /// Epoch milliseconds.
    pub ts: i64,
    /// Key to value.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl TsValues {
    /// Groups `(key, ts, value)` entries by timestamp, ascending.
    ///
    /// A later entry for the same key and timestamp replaces an earlier one.
    pub fn group<'a, I>(entries: I) -> Vec<TsValues>
    where
        I: IntoIterator<Item = (&'a str, i64, &'a TelemetryValue)>,
    {
        let mut by_ts: BTreeMap<i64, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
        for (key, ts, value) in entries {
            by_ts
                .entry(ts)
                .or_default()
                .insert(key.to_string(), value.to_json());
        }
        by_ts
            .into_iter()
            .map(|(ts, values)| TsValues { ts, values })
            .collect()
    }
}
