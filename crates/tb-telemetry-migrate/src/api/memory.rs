//! In-memory [`TelemetryApi`] used by the pipeline tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::api::{TelemetryApi, TelemetryQuery, TimeseriesPage};
use crate::error::{Error, Result};
use crate::model::{DataPoint, Device, DeviceId, TelemetryValue, TsValues};

type StoreKey = (DeviceId, String, i64);

/// Telemetry backend held in a map keyed by (device, key, ts).
///
/// Writes overwrite by timestamp like the real server. Failures can be
/// queued per operation name to exercise retry paths.
#[derive(Default)]
pub(crate) struct MemoryApi {
    devices: Mutex<Vec<Device>>,
    store: Mutex<BTreeMap<StoreKey, TelemetryValue>>,
    queries: Mutex<Vec<TelemetryQuery>>,
    saves: Mutex<Vec<(DeviceId, Vec<TsValues>)>>,
    failures: Mutex<HashMap<&'static str, VecDeque<Error>>>,
    find_calls: AtomicUsize,
}

impl MemoryApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a device under a fresh random id.
    pub(crate) fn add_device(&self, name: &str) -> DeviceId {
        let id = DeviceId(Uuid::new_v4());
        self.add_device_with_id(name, id);
        id
    }

    pub(crate) fn add_device_with_id(&self, name: &str, id: DeviceId) {
        self.devices.lock().unwrap().push(Device {
            name: name.to_string(),
            id,
        });
    }

    pub(crate) fn insert(&self, device: DeviceId, key: &str, ts: i64, value: TelemetryValue) {
        self.store
            .lock()
            .unwrap()
            .insert((device, key.to_string(), ts), value);
    }

    /// Every stored point of a device as `(key, ts, value)`, ordered by key then ts.
    pub(crate) fn points(&self, device: DeviceId) -> Vec<(String, i64, TelemetryValue)> {
        self.store
            .lock()
            .unwrap()
            .iter()
            .filter(|((id, _, _), _)| *id == device)
            .map(|((_, key, ts), value)| (key.clone(), *ts, value.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub(crate) fn queries(&self) -> Vec<TelemetryQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub(crate) fn saves(&self) -> Vec<(DeviceId, Vec<TsValues>)> {
        self.saves.lock().unwrap().clone()
    }

    pub(crate) fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Makes the next call of `operation` fail with `error`.
    pub(crate) fn fail_next(&self, operation: &'static str, error: Error) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    fn take_failure(&self, operation: &'static str) -> Result<()> {
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TelemetryApi for MemoryApi {
    fn api_name(&self) -> &'static str {
        "memory"
    }

    async fn find_device(&self, name: &str) -> Result<Option<Device>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure("find_device")?;
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn timeseries_keys(&self, device: DeviceId) -> Result<Vec<String>> {
        self.take_failure("timeseries_keys")?;
        let keys: BTreeSet<String> = self
            .store
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _, _)| *id == device)
            .map(|(_, key, _)| key.clone())
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn get_telemetry(&self, query: &TelemetryQuery) -> Result<TimeseriesPage> {
        self.queries.lock().unwrap().push(query.clone());
        self.take_failure("get_telemetry")?;

        let mut page = TimeseriesPage::new();
        if query.start_ts >= query.end_ts {
            return Ok(page);
        }
        let store = self.store.lock().unwrap();
        for key in &query.keys {
            let points: Vec<DataPoint> = store
                .range(
                    (query.device, key.clone(), query.start_ts)
                        ..(query.device, key.clone(), query.end_ts),
                )
                .take(query.limit)
                .map(|((_, _, ts), value)| DataPoint {
                    ts: *ts,
                    value: value.clone(),
                })
                .collect();
            if !points.is_empty() {
                page.insert(key.clone(), points);
            }
        }
        Ok(page)
    }

    async fn save_telemetry(&self, device: DeviceId, entries: &[TsValues]) -> Result<()> {
        self.take_failure("save_telemetry")?;
        self.saves
            .lock()
            .unwrap()
            .push((device, entries.to_vec()));

        let mut store = self.store.lock().unwrap();
        for entry in entries {
            for (key, value) in &entry.values {
                store.insert(
                    (device, key.clone(), entry.ts),
                    TelemetryValue::from_json(value.clone()),
                );
            }
        }
        Ok(())
    }
}
