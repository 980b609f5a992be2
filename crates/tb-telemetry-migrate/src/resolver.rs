//! Device name to id resolution with a per-run cache.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::api::TelemetryApi;
use crate::error::{Error, Result};
use crate::model::{Device, DeviceId};
use crate::retry::RetryPolicy;

/// Resolves device names through the API, once per name per run.
///
/// Matching is exact and case-sensitive. A missing device is an error, never
/// a skip.
pub struct DeviceResolver<'a> {
    api: &'a dyn TelemetryApi,
    retry: RetryPolicy,
    cache: HashMap<String, DeviceId>,
}

impl<'a> DeviceResolver<'a> {
    /// Creates an empty resolver.
    pub fn new(api: &'a dyn TelemetryApi, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            cache: HashMap::new(),
        }
    }

    /// Returns the cached id for `name`, if it has been resolved.
    pub fn cached(&self, name: &str) -> Option<DeviceId> {
        self.cache.get(name).copied()
    }

    /// Number of names resolved so far.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Resolves one name.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if no device has exactly this name, or the
    /// lookup error once retries are exhausted.
    pub async fn resolve(&mut self, name: &str) -> Result<DeviceId> {
        if let Some(id) = self.cached(name) {
            return Ok(id);
        }

        let api = self.api;
        let found = self
            .retry
            .run("find_device", move || api.find_device(name))
            .await?;

        match found {
            Some(device) if device.name == name => {
                debug!("Resolved device '{}' to {}", name, device.id);
                self.cache.insert(name.to_string(), device.id);
                Ok(device.id)
            }
            _ => Err(Error::DeviceNotFound(name.to_string())),
        }
    }

    /// Resolves every name, in input order.
    ///
    /// Blank names are skipped and duplicates appear once, at their first
    /// position. The first unknown name aborts the whole call.
    ///
    /// # Errors
    ///
    /// See [`DeviceResolver::resolve`].
    pub async fn resolve_all<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || devices.iter().any(|d| d.name == name) {
                continue;
            }
            let id = self.resolve(name).await?;
            devices.push(Device {
                name: name.to_string(),
                id,
            });
        }
        info!(
            "Resolved {} device(s) via {}",
            devices.len(),
            self.api.api_name()
        );
        Ok(devices)
    }
}
