use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, TimeDelta, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use ulid::Ulid;

use rentrack::engine::{Engine, Policy};
use rentrack::gateway::{Fanout, Gateway};
use rentrack::http::{router, AppState};
use rentrack::model::{RateCard, Vehicle, VehicleStatus};
use rentrack::store::WalStore;
use rentrack::telemetry::{LocalBroker, PubSub, Relay, RelayConfig};

// ── Test infrastructure ──────────────────────────────────────

struct TestApp {
    app: Router,
    vehicle_id: Ulid,
    broker: Arc<LocalBroker>,
}

async fn start_app() -> TestApp {
    let dir = std::env::temp_dir().join(format!("rentrack_http_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(WalStore::open(&dir.join("rentrack.wal")).unwrap());

    let vehicle_id = Ulid::new();
    store
        .register_vehicle(Vehicle {
            id: vehicle_id,
            name: "Clio".into(),
            status: VehicleStatus::Active,
            rates: RateCard { daily: 1000, monthly: 25000, hourly: None },
        })
        .await
        .unwrap();

    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        Policy::default(),
        Fanout::disabled(),
    ));
    let broker = Arc::new(LocalBroker::new());
    let relay = Arc::new(Relay::new(
        broker.clone(),
        Some(engine.clone()),
        Fanout::disabled(),
        RelayConfig::default(),
    ));
    let app = router(AppState {
        engine,
        relay,
        gateway: Arc::new(Gateway::new(Some("s3cret".into()))),
        shutdown: CancellationToken::new(),
    });
    TestApp { app, vehicle_id, broker }
}

fn day(offset: i64) -> String {
    (Utc::now().date_naive() + TimeDelta::days(offset)).to_string()
}

enum As {
    Anonymous,
    User(&'static str),
    Admin,
}

async fn call(app: &Router, method: &str, uri: &str, who: As, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    match who {
        As::Anonymous => {}
        As::User(id) => req = req.header("x-user-id", id),
        As::Admin => req = req.header("x-user-id", "admin-1").header("x-user-role", "admin"),
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn book(t: &TestApp, user: &'static str, from: i64, to: i64) -> Value {
    let (status, body) = call(
        &t.app,
        "POST",
        "/reservations",
        As::User(user),
        Some(json!({ "vehicleId": t.vehicle_id.to_string(), "startDate": day(from), "endDate": day(to) })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"].clone()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_returns_priced_pending_booking() {
    let t = start_app().await;
    let r = book(&t, "alice", 10, 14).await;
    assert_eq!(r["status"], "pending");
    assert_eq!(r["userId"], "alice");
    assert_eq!(r["duration"]["days"], 5);
    assert_eq!(r["totalCost"], 5000);
}

#[tokio::test]
async fn create_requires_identity_and_valid_input() {
    let t = start_app().await;
    let body = json!({ "vehicleId": t.vehicle_id.to_string(), "startDate": day(1), "endDate": day(2) });
    let (status, _) = call(&t.app, "POST", "/reservations", As::Anonymous, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &t.app,
        "POST",
        "/reservations",
        As::User("alice"),
        Some(json!({ "car": t.vehicle_id.to_string(), "startDate": day(5), "endDate": day(2) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Start date must be before end date");

    let (status, body) = call(
        &t.app,
        "POST",
        "/reservations",
        As::User("alice"),
        Some(json!({ "vehicleId": Ulid::new().to_string(), "startDate": day(1), "endDate": day(2) })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Car not found");

    let (status, _) = call(&t.app, "POST", "/reservations", As::User("alice"), Some(json!({ "x": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn approve_then_overlapping_create_conflicts() {
    let t = start_app().await;
    let first = book(&t, "alice", 10, 14).await;
    let id = first["id"].as_str().unwrap();

    let (status, _) = call(&t.app, "PATCH", &format!("/reservations/approve/{id}"), As::User("alice"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&t.app, "PATCH", &format!("/reservations/approve/{id}"), As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");

    let (status, body) = call(
        &t.app,
        "POST",
        "/reservations",
        As::User("bob"),
        Some(json!({ "vehicleId": t.vehicle_id.to_string(), "startDate": day(12), "endDate": day(20) })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().starts_with("Car is not available"));
    assert_eq!(body["conflicts"].as_array().unwrap().len(), 1);
    assert_eq!(body["conflicts"][0]["id"], id);
}

#[tokio::test]
async fn availability_and_unavailable_dates() {
    let t = start_app().await;
    let r = book(&t, "alice", 20, 25).await;
    let id = r["id"].as_str().unwrap();
    call(&t.app, "PATCH", &format!("/reservations/approve/{id}"), As::Admin, None).await;

    let uri = format!(
        "/resources/{}/check-availability?startDate={}&endDate={}",
        t.vehicle_id,
        day(18),
        day(21)
    );
    let (status, body) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["available"], false);
    assert_eq!(body["data"]["conflicts"][0]["id"], id);

    let uri = format!(
        "/resources/{}/check-availability?startDate={}&endDate={}&excludeId={id}",
        t.vehicle_id,
        day(18),
        day(21)
    );
    let (_, body) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(body["data"]["available"], true);

    let uri = format!("/resources/{}/unavailable-dates", t.vehicle_id);
    let (status, body) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let uri = format!(
        "/resources/{}/unavailable-dates?fromDate={}&toDate={}",
        t.vehicle_id,
        day(30),
        day(40)
    );
    let (_, body) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = call(&t.app, "GET", "/resources/not-an-id/unavailable-dates", As::Anonymous, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn availability_rejects_unknown_vehicle_and_past_dates() {
    let t = start_app().await;
    let uri = format!(
        "/resources/{}/check-availability?startDate={}&endDate={}",
        Ulid::new(),
        day(1),
        day(2)
    );
    let (status, body) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Car not found");

    let uri = format!("/resources/{}/unavailable-dates", Ulid::new());
    let (status, _) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!(
        "/resources/{}/check-availability?startDate=2020-01-01&endDate=2020-01-05",
        t.vehicle_id
    );
    let (status, body) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Start date must be today or in the future");

    let uri = format!("/resources/{}/unavailable-dates?fromDate=%2B262142-12-31", t.vehicle_id);
    let (status, _) = call(&t.app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_is_owner_scoped_and_idempotent() {
    let t = start_app().await;
    let r = book(&t, "alice", 3, 4).await;
    let uri = format!("/reservations/cancel/{}", r["id"].as_str().unwrap());

    let (status, body) = call(&t.app, "PATCH", &uri, As::User("mallory"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Booking not found");

    let (status, body) = call(&t.app, "PATCH", &uri, As::User("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    let (status, body) = call(&t.app, "PATCH", &uri, As::User("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
}

#[tokio::test]
async fn reject_and_update() {
    let t = start_app().await;
    let r = book(&t, "alice", 5, 6).await;
    let id = r["id"].as_str().unwrap();

    let (status, body) = call(
        &t.app,
        "PATCH",
        &format!("/reservations/{id}"),
        As::Admin,
        Some(json!({ "startDate": day(7), "endDate": day(9), "paid": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["totalCost"], 3000);
    assert_eq!(body["data"]["paid"], true);

    let (status, _) = call(
        &t.app,
        "PATCH",
        &format!("/reservations/{id}"),
        As::Admin,
        Some(json!({ "startDate": day(7) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&t.app, "PATCH", &format!("/reservations/reject/{id}"), As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rejected");
    let (status, _) = call(&t.app, "PATCH", &format!("/reservations/approve/{id}"), As::Admin, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn listing_is_scoped_to_caller() {
    let t = start_app().await;
    let a = book(&t, "alice", 1, 1).await;
    book(&t, "bob", 2, 2).await;

    let (_, body) = call(&t.app, "GET", "/reservations", As::User("alice"), None).await;
    let mine = body["data"].as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["id"], a["id"]);

    let (_, body) = call(&t.app, "GET", "/reservations", As::Admin, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    let (_, body) = call(&t.app, "GET", "/reservations?userId=bob", As::Admin, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let uri = format!("/reservations/{}", a["id"].as_str().unwrap());
    let (status, _) = call(&t.app, "GET", &uri, As::User("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&t.app, "GET", &uri, As::User("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn stats_count_paid_bookings() {
    let t = start_app().await;
    let body = json!({
        "vehicleId": t.vehicle_id.to_string(),
        "startDate": day(2),
        "endDate": day(3),
        "paid": true,
    });
    let (status, _) = call(&t.app, "POST", "/reservations", As::User("alice"), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    book(&t, "bob", 5, 5).await;

    let (status, _) = call(&t.app, "GET", "/reservations/monthly-stats", As::User("alice"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&t.app, "GET", "/reservations/yearly-stats", As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalBookings"], 1);
    assert_eq!(body["data"]["totalRevenue"], 2000);
    assert_eq!(body["data"]["totalCancelled"], 0);
}

#[tokio::test]
async fn ring_and_telemetry_bridge() {
    let t = start_app().await;
    let mut device = t.broker.subscribe("Ring_car-7").await.unwrap();
    let (status, _) = call(&t.app, "POST", "/resources/car-7/ring", As::User("alice"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&t.app, "POST", "/resources/car-7/ring", As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Ring command sent");
    let cmd: Value = serde_json::from_slice(&device.recv().await.unwrap()).unwrap();
    assert_eq!(cmd["action"], "ring");

    let mut inbound = t.broker.subscribe("locationUpdate").await.unwrap();
    let (status, _) = call(
        &t.app,
        "POST",
        "/telemetry",
        As::Anonymous,
        Some(json!({ "carID": "car-7", "lat": 36.7, "lon": 3.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let raw: Value = serde_json::from_slice(&inbound.recv().await.unwrap()).unwrap();
    assert_eq!(raw["carID"], "car-7");
}

#[tokio::test]
async fn tracking_lists_ongoing_only() {
    let t = start_app().await;
    book(&t, "alice", 1, 2).await;
    let (status, body) = call(&t.app, "GET", "/reservations/tracking", As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
    // Past windows are rejected before storage.
    let past = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().to_string();
    let (status, _) = call(
        &t.app,
        "POST",
        "/reservations",
        As::User("alice"),
        Some(json!({ "vehicleId": t.vehicle_id.to_string(), "startDate": past, "endDate": past })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
