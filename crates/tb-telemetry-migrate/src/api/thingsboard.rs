//! ThingsBoard REST client.
//!
//! Talks to the tenant-level REST API: JWT login, device lookup by name and
//! the timeseries read/write endpoints of the telemetry plugin.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::common::{create_http_client, error_from_response, join_url};
use crate::api::{TelemetryApi, TelemetryQuery, TimeseriesPage};
use crate::config::{validate_url, ConnectionConfig};
use crate::error::{Error, Result};
use crate::model::{DataPoint, Device, DeviceId, TelemetryValue, TsValues};

/// Header carrying the JWT on every authenticated call.
const AUTH_HEADER: &str = "X-Authorization";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct EntityIdResponse {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct DeviceResponse {
    id: EntityIdResponse,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    ts: i64,
    value: serde_json::Value,
}

/// ThingsBoard REST client.
pub struct ThingsboardClient {
    base_url: String,
    username: String,
    password: String,
    http: Client,
    token: RwLock<Option<String>>,
    strict_data_types: bool,
}

impl ThingsboardClient {
    /// Creates a client. Call [`ThingsboardClient::login`] before any other request.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not an http(s) URL or the HTTP client
    /// cannot be built.
    pub fn new(connection: &ConnectionConfig) -> Result<Self> {
        validate_url(&connection.host)?;
        Ok(Self {
            base_url: connection.host.trim_end_matches('/').to_string(),
            username: connection.username.clone(),
            password: connection.password.clone(),
            http: create_http_client(connection.timeout())?,
            token: RwLock::new(None),
            strict_data_types: true,
        })
    }

    /// Whether to request typed values. When off, text values are type-inferred.
    #[must_use]
    pub fn with_strict_data_types(mut self, strict: bool) -> Self {
        self.strict_data_types = strict;
        self
    }

    /// Authenticates with the stored credentials and keeps the session token.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] if the credentials are rejected.
    pub async fn login(&self) -> Result<()> {
        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "login").await);
        }

        let login: LoginResponse = response.json().await?;
        *self.token.write().await = Some(login.token);
        info!("Logged in to {} as {}", self.base_url, self.username);
        Ok(())
    }

    /// Returns true once a session token is held.
    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn telemetry_url(&self, device: DeviceId, suffix: &str) -> String {
        self.url(&format!("/api/plugins/telemetry/DEVICE/{}/{}", device, suffix))
    }

    /// Sends an authenticated request built by `build`.
    ///
    /// A 401 on an established session triggers one re-login and one repeat,
    /// since tokens expire during long exports.
    async fn send<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut relogged = false;
        loop {
            let token = self.token.read().await.clone().ok_or_else(|| {
                Error::Authentication(format!("{}: not logged in", operation))
            })?;

            let response = build(&self.http)
                .header(AUTH_HEADER, format!("Bearer {}", token))
                .send()
                .await?;

            if response.status() == StatusCode::UNAUTHORIZED && !relogged {
                debug!("{}: session rejected, logging in again", operation);
                relogged = true;
                self.login().await?;
                continue;
            }

            if !response.status().is_success() {
                return Err(error_from_response(response, operation).await);
            }

            return Ok(response);
        }
    }

    fn convert_value(&self, value: serde_json::Value) -> TelemetryValue {
        match value {
            serde_json::Value::String(s) if !self.strict_data_types => TelemetryValue::infer(&s),
            other => TelemetryValue::from_json(other),
        }
    }
}

#[async_trait]
impl TelemetryApi for ThingsboardClient {
    fn api_name(&self) -> &'static str {
        "thingsboard"
    }

    async fn find_device(&self, name: &str) -> Result<Option<Device>> {
        let url = self.url("/api/tenant/devices");
        let result = self
            .send("find_device", |http| {
                http.get(&url).query(&[("deviceName", name)])
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(Error::Client { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let device: DeviceResponse = response.json().await?;
        Ok(Some(Device {
            name: device.name,
            id: DeviceId(device.id.id),
        }))
    }

    async fn timeseries_keys(&self, device: DeviceId) -> Result<Vec<String>> {
        let url = self.telemetry_url(device, "keys/timeseries");
        let response = self
            .send("timeseries_keys", |http| http.get(&url))
            .await?;
        Ok(response.json().await?)
    }

    async fn get_telemetry(&self, query: &TelemetryQuery) -> Result<TimeseriesPage> {
        let url = self.telemetry_url(query.device, "values/timeseries");
        let params = [
            ("keys", query.keys.join(",")),
            ("startTs", query.start_ts.to_string()),
            ("endTs", query.end_ts.to_string()),
            ("limit", query.limit.to_string()),
            ("agg", "NONE".to_string()),
            ("orderBy", "ASC".to_string()),
            ("useStrictDataTypes", self.strict_data_types.to_string()),
        ];

        let response = self
            .send("get_telemetry", |http| http.get(&url).query(&params))
            .await?;

        let raw: HashMap<String, Vec<RawPoint>> = response.json().await?;
        Ok(raw
            .into_iter()
            .map(|(key, points)| {
                let points = points
                    .into_iter()
                    .map(|p| DataPoint {
                        ts: p.ts,
                        value: self.convert_value(p.value),
                    })
                    .collect();
                (key, points)
            })
            .collect())
    }

    async fn save_telemetry(&self, device: DeviceId, entries: &[TsValues]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let url = self.telemetry_url(device, "timeseries/ANY");
        self.send("save_telemetry", |http| http.post(&url).json(entries))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "thingsboard_tests.rs"]
mod tests;
