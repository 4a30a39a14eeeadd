//! Admin API integration tests
//!
//! Tests for the health, stats, metrics, batch, and schedule endpoints
//! against a running scheduler with in-memory storage and the mock transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use trickled::admin::{AdminServer, AdminState};
use trickled::bootstrap::{Services, ShutdownManager};
use trickled::config::{Config, StoreConfig};
use trickled::store::{MemoryStorage, SharedStorage};

/// Health response
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct PlannedSend {
    schedule_id: String,
    scheduled_at_utc: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BatchAccepted {
    batch_id: String,
    schedules: Vec<PlannedSend>,
}

/// Test fixture that starts the scheduler and admin API on an ephemeral port
struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    shutdown: Arc<ShutdownManager>,
    base_url: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.store = StoreConfig::memory();
        config.transport.mock.latency = Duration::ZERO;

        let shutdown = ShutdownManager::new(Duration::from_secs(1));
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let services = Services::start(&config, storage, shutdown.clone()).unwrap();

        let state = Arc::new(AdminState::new(&services, None));
        state.set_ready(true);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let admin = AdminServer::new(&config.admin, state, shutdown.clone());

        let handle = tokio::spawn(async move {
            let _ = admin.serve(listener).await;
            // Keeps the scheduler alive as long as the admin server
            drop(services);
        });

        Self {
            handle,
            shutdown,
            base_url: format!("http://{}", address),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("request failed")
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    async fn create_batch(&self, body: Value) -> BatchAccepted {
        let resp = self.post("/batches", body).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        resp.json().await.expect("invalid json")
    }

    /// GET a record, retrying until it exists and satisfies `check`.
    async fn record_until<F>(&self, path: &str, check: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        let check = &check;
        eventually(move || async move {
            let resp = self.get(path).await;
            if resp.status() != StatusCode::OK {
                return None;
            }
            let body: Value = resp.json().await.ok()?;
            check(&body["record"]).then_some(body)
        })
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn eventually<F, Fut, T>(f: F) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..100 {
        if let Some(value) = f().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

fn later_batch(n: usize) -> Value {
    json!({
        "messages": (0..n)
            .map(|i| json!({"target_address": format!("+25884000000{}", i), "body": "hello"}))
            .collect::<Vec<_>>(),
        "policy": {"mode": "fixed_spacing", "spacing_ms": 60000},
        "start_at_utc": Utc::now() + TimeDelta::hours(1),
    })
}

#[tokio::test]
async fn test_healthz_returns_healthy() {
    let server = TestServer::start().await;

    let resp = server.get("/healthz").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let health: HealthResponse = resp.json().await.expect("invalid json");
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_livez_and_metrics() {
    let server = TestServer::start().await;

    assert_eq!(server.get("/livez").await.status(), StatusCode::OK);

    let resp = server.get("/metrics").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_readyz_drops_while_draining() {
    let server = TestServer::start().await;

    assert_eq!(server.get("/readyz").await.status(), StatusCode::OK);

    server.shutdown.start_drain();

    assert_eq!(
        server.get("/readyz").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    let resp = server.post("/batches", later_batch(1)).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_create_batch_plans_and_persists() {
    let server = TestServer::start().await;
    let start = Utc::now() + TimeDelta::hours(1);

    let accepted = server
        .create_batch(json!({
            "batch_id": "0b6f0c1e-7a57-4c8e-9a51-2a0d1c3e4f50",
            "messages": [
                {"target_address": "+258840000001", "body": "one"},
                {"target_address": "+258840000002", "body": "two"},
                {"target_address": "+258840000003", "body": "three"}
            ],
            "policy": {"mode": "spread_over_window", "duration_ms": 3600000},
            "start_at_utc": start,
            "metadata": {"topic": "reminders", "tags": ["a"]}
        }))
        .await;

    assert_eq!(accepted.batch_id, "0b6f0c1e-7a57-4c8e-9a51-2a0d1c3e4f50");
    let planned: Vec<_> = accepted.schedules.iter().map(|s| s.scheduled_at_utc).collect();
    assert_eq!(
        planned,
        vec![start, start + TimeDelta::minutes(30), start + TimeDelta::hours(1)]
    );

    let batch = server
        .record_until(&format!("/batches/{}", accepted.batch_id), |_| true)
        .await;
    assert_eq!(batch["version"], 1);
    assert_eq!(batch["record"]["scheduled_count"], 3);
    assert_eq!(batch["record"]["status"], "active");

    for planned in &accepted.schedules {
        let schedule = server
            .record_until(&format!("/schedules/{}", planned.schedule_id), |_| true)
            .await;
        assert_eq!(schedule["record"]["payload"]["metadata"]["topic"], "reminders");
        assert_eq!(schedule["record"]["paused"], false);
    }
}

#[tokio::test]
async fn test_existing_batch_returns_stored_plan() {
    let server = TestServer::start().await;
    let mut body = later_batch(2);
    body["batch_id"] = json!("5d1c9a0e-2f3b-4e6a-8b7c-9d0e1f2a3b4c");
    let accepted = server.create_batch(body.clone()).await;
    server
        .record_until(&format!("/batches/{}", accepted.batch_id), |_| true)
        .await;

    body["policy"] = json!({"mode": "fixed_spacing", "spacing_ms": 1000});
    body["start_at_utc"] = json!(Utc::now() + TimeDelta::hours(5));
    let resp = server.post("/batches", body).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let again: BatchAccepted = resp.json().await.unwrap();
    assert_eq!(again.batch_id, accepted.batch_id);
    assert_eq!(again.schedules.len(), 2);
    for (stored, planned) in again.schedules.iter().zip(&accepted.schedules) {
        assert_eq!(stored.schedule_id, planned.schedule_id);
        assert_eq!(stored.scheduled_at_utc, planned.scheduled_at_utc);
    }
}

#[tokio::test]
async fn test_create_batch_validation() {
    let server = TestServer::start().await;

    let empty = server
        .post(
            "/batches",
            json!({"messages": [], "policy": {"mode": "fixed_spacing", "spacing_ms": 1000}}),
        )
        .await;
    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let negative = server
        .post(
            "/batches",
            json!({
                "messages": [{"target_address": "+258840000001", "body": "x"}],
                "policy": {"mode": "fixed_spacing", "spacing_ms": -1000}
            }),
        )
        .await;
    assert_eq!(negative.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = negative.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("spacing"));

    let zero = server
        .post(
            "/batches",
            json!({
                "messages": [
                    {"target_address": "+258840000001", "body": "x"},
                    {"target_address": "+258840000002", "body": "y"}
                ],
                "policy": {"mode": "fixed_spacing", "spacing_ms": 0}
            }),
        )
        .await;
    assert_eq!(zero.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = zero.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("spacing"));
}

#[tokio::test]
async fn test_batch_pause_not_implemented() {
    let server = TestServer::start().await;
    let accepted = server.create_batch(later_batch(1)).await;

    let resp = server
        .post(&format!("/batches/{}/pause", accepted.batch_id), json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

    let resp = server
        .post(&format!("/batches/{}/resume", accepted.batch_id), json!({}))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_unknown_records_are_404() {
    let server = TestServer::start().await;
    let id = "5d2c6a3e-1f7b-4e0a-8c9d-3b2a1f0e9d8c";

    assert_eq!(
        server.get(&format!("/batches/{}", id)).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        server
            .post(&format!("/schedules/{}/pause", id), json!({}))
            .await
            .status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_pause_then_resume_with_offset() {
    let server = TestServer::start().await;
    let accepted = server.create_batch(later_batch(2)).await;
    let target = &accepted.schedules[1];
    let path = format!("/schedules/{}", target.schedule_id);
    server.record_until(&path, |_| true).await;

    let t0 = Utc::now();
    let resp = server
        .post(&format!("{}/pause", path), json!({"request_at_utc": t0}))
        .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    server
        .record_until(&path, |r| r["paused"] == json!(true))
        .await;

    // Not newer than the pause: dropped
    server
        .post(
            &format!("{}/resume", path),
            json!({"offset_ms": 600000, "request_at_utc": t0}),
        )
        .await;

    let resp = server
        .post(
            &format!("{}/resume", path),
            json!({"offset_ms": 600000, "request_at_utc": t0 + TimeDelta::seconds(1)}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resumed = server
        .record_until(&path, |r| r["paused"] == json!(false))
        .await;
    let fire_at: DateTime<Utc> =
        serde_json::from_value(resumed["record"]["current_fire_at_utc"].clone()).unwrap();
    assert_eq!(fire_at, target.scheduled_at_utc + TimeDelta::minutes(10));
    assert_eq!(resumed["version"], 3);
}

#[tokio::test]
async fn test_immediate_batch_completes() {
    let server = TestServer::start().await;
    let accepted = server
        .create_batch(json!({
            "messages": (0..4)
                .map(|i| json!({"target_address": format!("+25884000001{}", i), "body": "now"}))
                .collect::<Vec<_>>(),
            "policy": {"mode": "fixed_spacing", "spacing_ms": 10}
        }))
        .await;

    let batch = server
        .record_until(&format!("/batches/{}", accepted.batch_id), |r| {
            r["status"] == json!("completed")
        })
        .await;
    assert_eq!(batch["record"]["confirmed_count"], 4);

    let stats: Value = server.get("/stats").await.json().await.unwrap();
    assert_eq!(stats["store"]["completed_batches"], 1);
    assert_eq!(stats["store"]["terminal_schedules"], 4);
    assert_eq!(stats["accepting"], true);
}

#[tokio::test]
async fn test_external_confirmation() {
    let server = TestServer::start().await;
    let accepted = server.create_batch(later_batch(1)).await;
    let path = format!("/schedules/{}", accepted.schedules[0].schedule_id);
    server.record_until(&path, |_| true).await;

    let resp = server
        .post(
            &format!("{}/confirmations", path),
            json!({"status": "failed", "reason": "unreachable", "failed_at_utc": Utc::now()}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let schedule = server
        .record_until(&path, |r| r["terminal"] == json!(true))
        .await;
    assert_eq!(schedule["record"]["outcome"]["status"], "failed");

    let batch = server
        .record_until(&format!("/batches/{}", accepted.batch_id), |r| {
            r["status"] == json!("completed")
        })
        .await;
    assert_eq!(batch["record"]["per_message"][0]["status"], "failed");
}
