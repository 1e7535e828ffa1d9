//! Admin API contract tests against an in-memory pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use deadman_core::config::SweepConfig;
use deadman_core::{Channel, ChannelKind, Check, PingInput, PingKind};
use deadman_monitor::StatusEngine;
use deadman_notify::{AlertDispatcher, Alert, Notifier, TemplateRenderer, TransportError, TransportRegistry};
use deadman_server::{build_router, AppState, Monitor};
use deadman_store::{MemoryStore, Store};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

struct CountingNotifier(Arc<AtomicUsize>);

#[async_trait::async_trait]
impl Notifier for CountingNotifier {
    async fn send(&self, _alert: &Alert) -> Result<(), TransportError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn channel_name(&self) -> &str {
        "counting"
    }
}

struct CountingRegistry(Arc<AtomicUsize>);

impl TransportRegistry for CountingRegistry {
    fn notifier_for(&self, _channel: &Channel) -> Result<Arc<dyn Notifier>, TransportError> {
        Ok(Arc::new(CountingNotifier(self.0.clone())))
    }
}

struct Harness {
    app: Router,
    check: Check,
    sent: Arc<AtomicUsize>,
}

/// One simple check with one webhook channel, pinged once and then left to
/// go down.
async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sent = Arc::new(AtomicUsize::new(0));
    let renderer = Arc::new(TemplateRenderer::new());
    let dispatcher = AlertDispatcher::new(store.clone(), Arc::new(CountingRegistry(sent.clone())), renderer);
    let monitor = Arc::new(Monitor::new(
        Arc::new(StatusEngine::new(store.clone())),
        Arc::new(dispatcher),
        &SweepConfig::default(),
    ));

    let check = monitor
        .register(
            Check::simple("nightly-backup", Duration::from_secs(3_600), Duration::from_secs(600), t(0))
                .with_tags(&["prod"]),
            t(0),
        )
        .await
        .unwrap();
    let mut channel = Channel::new(ChannelKind::Webhook, "https://example.com/hook", t(0));
    channel.subscribe(check.id);
    store.insert_channel(&channel).await.unwrap();

    monitor.ingest_ping(check.id, PingInput::of_kind(PingKind::Start), t(10)).await.unwrap();
    monitor
        .ingest_ping(check.id, PingInput::email("backup ok", "42 files"), t(20))
        .await
        .unwrap();
    monitor.sweep(t(10_000)).await.unwrap();

    let state = Arc::new(AppState::new(monitor, "memory", serde_json::json!({"profile": "test"})));
    Harness {
        app: build_router(state, "*"),
        check,
        sent,
    }
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn health_reports_backend() {
    let h = harness().await;
    let (status, json) = call(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "memory");
}

#[tokio::test]
async fn check_listing_and_filters() {
    let h = harness().await;
    let (status, json) = call(&h.app, "GET", "/api/checks", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "nightly-backup");
    assert_eq!(rows[0]["schedule"], "1 hour");
    assert_eq!(rows[0]["status"], "down");
    assert_eq!(rows[0]["n_pings"], 2);

    let (_, json) = call(&h.app, "GET", "/api/checks?status=up", None).await;
    assert!(json.as_array().unwrap().is_empty());

    let (status, json) = call(&h.app, "GET", &format!("/api/checks/{}", h.check.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], h.check.id.to_string());
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let h = harness().await;
    let missing = uuid::Uuid::new_v4();
    let (status, json) = call(&h.app, "GET", &format!("/api/checks/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));

    let (status, _) = call(&h.app, "GET", "/api/checks/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&h.app, "POST", &format!("/api/checks/{missing}/resend"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resend_writes_ledger_rows_without_new_flips() {
    let h = harness().await;
    assert_eq!(h.sent.load(Ordering::SeqCst), 1);

    let (status, json) = call(&h.app, "POST", &format!("/api/checks/{}/resend", h.check.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["attempted"], 1);
    assert_eq!(h.sent.load(Ordering::SeqCst), 2);

    let (_, json) = call(&h.app, "GET", "/api/notifications?check_status=down", None).await;
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["channel_kind"], "webhook");
    assert_eq!(rows[0]["error"], "");

    let (_, json) = call(&h.app, "GET", &format!("/api/flips?check_id={}", h.check.id), None).await;
    let flips = json.as_array().unwrap();
    // new -> up, then up -> down.
    assert_eq!(flips.len(), 2);
    assert_eq!(flips[0]["new_status"], "down");
    assert!(flips.iter().all(|f| !f["processed"].is_null()));
}

#[tokio::test]
async fn bulk_resend_sums_channels() {
    let h = harness().await;
    let body = serde_json::json!({ "check_ids": [h.check.id, h.check.id] });
    let (status, json) = call(&h.app, "POST", "/api/checks/resend", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["checks"], 2);
    assert_eq!(json["attempted"], 2);
    assert!(json.get("failed").is_none());
}

#[tokio::test]
async fn bulk_resend_continues_past_unknown_checks() {
    let h = harness().await;
    let missing = uuid::Uuid::new_v4();
    let body = serde_json::json!({ "check_ids": [missing, h.check.id] });
    let (status, json) = call(&h.app, "POST", "/api/checks/resend", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["checks"], 1);
    assert_eq!(json["attempted"], 1);
    let failed = json["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["check_id"], missing.to_string());
    assert_eq!(h.sent.load(Ordering::SeqCst), 2);

    let (_, json) = call(&h.app, "GET", "/api/notifications", None).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn channel_rows_carry_health() {
    let h = harness().await;
    let (_, json) = call(&h.app, "GET", "/api/channels", None).await;
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "OK");
    assert_eq!(rows[0]["transport"], "webhook");
    assert_eq!(rows[0]["checks"], 1);

    let (_, json) = call(&h.app, "GET", "/api/channels?min_duration_secs=60", None).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ping_rows_hide_bodies() {
    let h = harness().await;
    let (_, json) = call(&h.app, "GET", "/api/pings", None).await;
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("body").is_none()));

    let (_, json) = call(&h.app, "GET", "/api/pings?scheme=email", None).await;
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["has_body"], true);
    assert_eq!(rows[0]["object_size"], 8);

    let (_, json) = call(&h.app, "GET", "/api/pings?kind=start", None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}
