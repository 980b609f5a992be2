//! End-to-end tests against mock ThingsBoard servers.
//!
//! Telemetry is exported from one mock tenant to a file and imported into a
//! second tenant where the same device names have different ids.

#![allow(clippy::pedantic)]

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use tb_telemetry_migrate::{
    ConnectionConfig, DeviceResolver, Error, ExportOptions, ExportRequest, Exporter,
    ImportOptions, Importer, RetryPolicy, ThingsboardClient,
};

const SOURCE_ID: &str = "0b7b3c0e-2f4c-4d39-9f0e-6c1d2a3b4c5d";
const TARGET_ID: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
const HOUR_MS: i64 = 3_600_000;

/// Serves `values/timeseries` from a fixed point list, honouring the
/// requested keys, range and per-key limit.
struct TimeseriesResponder {
    points: Vec<(&'static str, i64, Value)>,
}

impl Respond for TimeseriesResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let params: BTreeMap<String, String> = request.url.query_pairs().into_owned().collect();
        let keys: Vec<&str> = params["keys"].split(',').collect();
        let start: i64 = params["startTs"].parse().unwrap();
        let end: i64 = params["endTs"].parse().unwrap();
        let limit: usize = params["limit"].parse().unwrap();

        let mut body = serde_json::Map::new();
        for key in keys {
            let mut points: Vec<&(&str, i64, Value)> = self
                .points
                .iter()
                .filter(|(k, ts, _)| *k == key && *ts >= start && *ts < end)
                .collect();
            points.sort_by_key(|(_, ts, _)| *ts);
            let page: Vec<Value> = points
                .into_iter()
                .take(limit)
                .map(|(_, ts, value)| json!({"ts": ts, "value": value}))
                .collect();
            if !page.is_empty() {
                body.insert(key.to_string(), Value::Array(page));
            }
        }
        ResponseTemplate::new(200).set_body_json(Value::Object(body))
    }
}

fn connection(server: &MockServer) -> ConnectionConfig {
    ConnectionConfig {
        host: server.uri(),
        username: "tenant@thingsboard.org".to_string(),
        password: "tenant".to_string(),
        timeout_secs: 5,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        add_jitter: false,
        ..Default::default()
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "jwt"})))
        .mount(server)
        .await;
}

async fn mount_device(server: &MockServer, name: &str, id: &str) {
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .and(query_param("deviceName", name))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": {"entityType": "DEVICE", "id": id},
            "name": name
        })))
        .mount(server)
        .await;
}

async fn source_server() -> MockServer {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_device(&server, "Boiler 1", SOURCE_ID).await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/api/plugins/telemetry/DEVICE/{}/keys/timeseries",
            SOURCE_ID
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["temperature", "mode"])))
        .mount(&server)
        .await;

    let mut points = Vec::new();
    for i in 0..30i64 {
        points.push(("temperature", i * 240_000, json!(20.5 + i as f64)));
    }
    points.push(("mode", 1_000, json!("eco")));
    points.push(("mode", HOUR_MS + 1_000, json!({"schedule": [6, 22]})));
    // Outside the exported range.
    points.push(("temperature", 2 * HOUR_MS, json!(99)));

    Mock::given(method("GET"))
        .and(path(format!(
            "/api/plugins/telemetry/DEVICE/{}/values/timeseries",
            SOURCE_ID
        )))
        .respond_with(TimeseriesResponder { points })
        .mount(&server)
        .await;

    server
}

async fn target_server() -> MockServer {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_device(&server, "Boiler 1", TARGET_ID).await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/api/plugins/telemetry/DEVICE/{}/timeseries/ANY",
            TARGET_ID
        )))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_export_then_import_between_tenants() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("telemetry.csv");

    // Export
    let source = source_server().await;
    let source_client = ThingsboardClient::new(&connection(&source)).unwrap();
    source_client.login().await.unwrap();
    let mut resolver = DeviceResolver::new(&source_client, fast_retry());
    let exporter = Exporter::new(
        &source_client,
        fast_retry(),
        ExportOptions {
            chunk_limit: 8,
            time_limit_minutes: 60,
            ..Default::default()
        },
    );
    let export_stats = exporter
        .export_to_file(
            &mut resolver,
            &ExportRequest {
                device_names: vec!["Boiler 1".to_string()],
                keys: None,
                start_ts: 0,
                end_ts: 2 * HOUR_MS,
            },
            &file,
        )
        .await
        .unwrap();

    assert_eq!(export_stats.windows, 2);
    assert_eq!(export_stats.records, 32);

    let text = std::fs::read_to_string(&file).unwrap();
    assert_eq!(text.lines().count(), 33);
    assert!(text.contains(&format!("{},mode,1000,eco,string,Boiler 1", SOURCE_ID)));

    // Import
    let target = target_server().await;
    let target_client = ThingsboardClient::new(&connection(&target)).unwrap();
    target_client.login().await.unwrap();
    let mut resolver = DeviceResolver::new(&target_client, fast_retry());
    let importer = Importer::new(
        &target_client,
        fast_retry(),
        ImportOptions {
            batch_size: 10,
            ..Default::default()
        },
    );
    let import_stats = importer.import_file(&mut resolver, &file).await.unwrap();

    assert_eq!(import_stats.records, 32);
    assert_eq!(import_stats.batches, 4);

    // Every written value, keyed by (key, ts).
    let mut written: BTreeMap<(String, i64), Value> = BTreeMap::new();
    for request in target.received_requests().await.unwrap() {
        if request.method.as_str() != "POST" || !request.url.path().ends_with("/timeseries/ANY") {
            continue;
        }
        assert_eq!(request.headers.get("X-Authorization").unwrap(), "Bearer jwt");
        let entries: Vec<Value> = serde_json::from_slice(&request.body).unwrap();
        let stamps: Vec<i64> = entries.iter().map(|e| e["ts"].as_i64().unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        for entry in entries {
            let ts = entry["ts"].as_i64().unwrap();
            for (key, value) in entry["values"].as_object().unwrap() {
                written.insert((key.clone(), ts), value.clone());
            }
        }
    }

    assert_eq!(written.len(), 32);
    assert_eq!(written[&("temperature".to_string(), 0)], json!(20.5));
    assert_eq!(written[&("mode".to_string(), 1_000)], json!("eco"));
    assert_eq!(
        written[&("mode".to_string(), HOUR_MS + 1_000)],
        json!({"schedule": [6, 22]})
    );
    assert!(!written.contains_key(&("temperature".to_string(), 2 * HOUR_MS)));
}

#[tokio::test]
async fn test_unknown_device_fails_export() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/tenant/devices"))
        .respond_with(ResponseTemplate::new(404).set_body_json(
            json!({"status": 404, "message": "Requested item wasn't found!", "errorCode": 32}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/plugins/telemetry/.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let client = ThingsboardClient::new(&connection(&server)).unwrap();
    client.login().await.unwrap();
    let mut resolver = DeviceResolver::new(&client, fast_retry());
    let exporter = Exporter::new(&client, fast_retry(), ExportOptions::default());

    let result = exporter
        .export_to_file(
            &mut resolver,
            &ExportRequest {
                device_names: vec!["Ghost".to_string()],
                keys: Some(vec!["temperature".to_string()]),
                start_ts: 0,
                end_ts: HOUR_MS,
            },
            &temp.path().join("out.csv"),
        )
        .await;

    assert!(matches!(result, Err(Error::DeviceNotFound(name)) if name == "Ghost"));
}

#[tokio::test]
async fn test_server_errors_during_export_recover() {
    let server = source_server().await;
    // Two failures ahead of the regular responder.
    Mock::given(method("GET"))
        .and(path(format!(
            "/api/plugins/telemetry/DEVICE/{}/values/timeseries",
            SOURCE_ID
        )))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let client = ThingsboardClient::new(&connection(&server)).unwrap();
    client.login().await.unwrap();
    let mut resolver = DeviceResolver::new(&client, fast_retry());
    let exporter = Exporter::new(&client, fast_retry(), ExportOptions::default());

    let stats = exporter
        .export_to_file(
            &mut resolver,
            &ExportRequest {
                device_names: vec!["Boiler 1".to_string()],
                keys: Some(vec!["mode".to_string()]),
                start_ts: 0,
                end_ts: 2 * HOUR_MS,
            },
            &temp.path().join("out.csv"),
        )
        .await
        .unwrap();

    assert_eq!(stats.records, 2);
}
