//! # Integration Tests for kc-api
//!
//! Drives the assembled router: kit order transitions, client returns,
//! consultation confirmation, the subscription entitlement ledger, pricing
//! settings, authentication and the OpenAPI document.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use kc_api::state::{AppConfig, AppState};

/// Helper: build the test app with auth disabled (every caller is admin).
fn test_app() -> axum::Router {
    kc_api::app(AppState::new())
}

/// Helper: build the test app with auth enabled.
fn test_app_with_auth(token: &str) -> axum::Router {
    let config = AppConfig {
        auth_token: Some(token.to_string()),
        ..AppConfig::default()
    };
    kc_api::app(AppState::with_config(config, None))
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Helper: send a request and decode the JSON response.
async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let text = body_string(response).await;
    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, value)
}

fn delivery() -> Value {
    json!({ "recipient_name": "Amina Yusuf", "address": "12 Canal Road, Lahore" })
}

async fn create_one_time_order(app: &axum::Router, user: Uuid) -> Value {
    let (status, order) = send(
        app,
        "POST",
        "/v1/kit-orders",
        Some(json!({ "user_id": user, "purchase_type": "one_time", "delivery": delivery() })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    order
}

async fn set_status(app: &axum::Router, id: &str, status: &str) -> (StatusCode, Value) {
    send(
        app,
        "PUT",
        &format!("/v1/kit-orders/{id}/status"),
        Some(json!({ "status": status })),
        None,
    )
    .await
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/liveness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

// -- Kit Orders ---------------------------------------------------------------

#[tokio::test]
async fn test_create_and_list_kit_orders() {
    let app = test_app();
    let user = Uuid::new_v4();
    let order = create_one_time_order(&app, user).await;
    assert_eq!(order["status"], "in_review");
    assert_eq!(order["purchase_type"], "one_time");
    assert_eq!(order["price"], "470.00");

    let (status, list) = send(&app, "GET", "/v1/kit-orders", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, filtered) = send(&app, "GET", "/v1/kit-orders?status=shipping", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(filtered.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_status_filter_is_422() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/v1/kit-orders?status=accepted", None, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_skipping_a_step_is_rejected() {
    let app = test_app();
    let order = create_one_time_order(&app, Uuid::new_v4()).await;
    let id = order["id"].as_str().unwrap();

    let (status, body) = set_status(&app, id, "received").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("in_review"));
    assert!(message.contains("shipping"));

    let (_, current) = send(&app, "GET", &format!("/v1/kit-orders/{id}"), None, None).await;
    assert_eq!(current["status"], "in_review");
}

#[tokio::test]
async fn test_full_kit_order_path_and_timeline() {
    let app = test_app();
    let order = create_one_time_order(&app, Uuid::new_v4()).await;
    let id = order["id"].as_str().unwrap();

    for next in ["shipping", "out_for_delivery", "returning", "received"] {
        let (status, body) = set_status(&app, id, next).await;
        assert_eq!(status, StatusCode::OK, "{next}: {body}");
        assert_eq!(body["status"], next);
    }

    let (status, timeline) = send(&app, "GET", &format!("/v1/kit-orders/{id}/timeline"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let labels: Vec<&str> = timeline["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["label"].as_str().unwrap())
        .collect();
    assert_eq!(
        labels,
        ["in_review", "shipping", "out_for_delivery", "returning", "received"]
    );
    assert_eq!(timeline["consistent"], true);
    assert_eq!(timeline["status"], "received");

    // Terminal: nothing leaves `received`.
    let (status, _) = set_status(&app, id, "shipping").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_cancel_only_during_review() {
    let app = test_app();
    let order = create_one_time_order(&app, Uuid::new_v4()).await;
    let id = order["id"].as_str().unwrap();
    let (status, _) = set_status(&app, id, "shipping").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = set_status(&app, id, "cancelled").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_get_missing_kit_order_is_404() {
    let app = test_app();
    let (status, body) = send(&app, "GET", &format!("/v1/kit-orders/{}", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_bad_json_is_422() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/kit-orders")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Auth: clients and admins ------------------------------------------------

#[tokio::test]
async fn test_auth_required_when_configured() {
    let app = test_app_with_auth("s3cret");
    let (status, _) = send(&app, "GET", "/v1/kit-orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/v1/kit-orders", None, Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    // Probes stay open.
    let (status, _) = send(&app, "GET", "/health/liveness", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_client_return_and_forbidden_transition() {
    let app = test_app_with_auth("s3cret");
    let user = Uuid::new_v4();
    let client = format!("client:{user}:s3cret");
    let stranger = format!("client:{}:s3cret", Uuid::new_v4());

    let (status, order) = send(
        &app,
        "POST",
        "/v1/kit-orders",
        Some(json!({ "purchase_type": "one_time", "delivery": delivery() })),
        Some(&client),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["user_id"], user.to_string());
    let id = order["id"].as_str().unwrap().to_string();

    // Clients cannot ship.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/v1/kit-orders/{id}/status"),
        Some(json!({ "status": "shipping" })),
        Some(&client),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    for next in ["shipping", "out_for_delivery"] {
        let (status, _) = send(
            &app,
            "PUT",
            &format!("/v1/kit-orders/{id}/status"),
            Some(json!({ "status": next })),
            Some("s3cret"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Other clients do not see the order at all.
    let (status, _) = send(&app, "POST", &format!("/v1/kit-orders/{id}/return"), None, Some(&stranger)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", &format!("/v1/kit-orders/{id}/return"), None, Some(&client)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returning");

    // Only the owner's orders are listed.
    let (_, mine) = send(&app, "GET", "/v1/kit-orders", None, Some(&client)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, theirs) = send(&app, "GET", "/v1/kit-orders", None, Some(&stranger)).await;
    assert!(theirs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_client_cannot_order_for_someone_else() {
    let app = test_app_with_auth("s3cret");
    let client = format!("client:{}:s3cret", Uuid::new_v4());
    let (status, _) = send(
        &app,
        "POST",
        "/v1/kit-orders",
        Some(json!({ "user_id": Uuid::new_v4(), "purchase_type": "one_time", "delivery": delivery() })),
        Some(&client),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// -- Subscriptions ------------------------------------------------------------

async fn create_subscription(app: &axum::Router, user: Uuid, tier: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/v1/subscriptions",
        Some(json!({ "user_id": user, "tier": tier })),
        None,
    )
    .await
}

#[tokio::test]
async fn test_annual_moderate_allows_two_kits() {
    let app = test_app();
    let user = Uuid::new_v4();
    let (status, sub) = create_subscription(&app, user, "annual_moderate").await;
    assert_eq!(status, StatusCode::CREATED, "{sub}");
    assert_eq!(sub["kits_allowed"], 2);
    assert_eq!(sub["price"], "800.00");
    let id = sub["id"].as_str().unwrap();

    for expected_used in [1, 2] {
        let (status, body) = send(&app, "POST", &format!("/v1/subscriptions/{id}/use-kit"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kits_used"], expected_used);
    }

    let (status, body) = send(&app, "POST", &format!("/v1/subscriptions/{id}/use-kit"), None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ENTITLEMENT_EXHAUSTED");

    let (_, current) = send(&app, "GET", &format!("/v1/subscriptions/{id}"), None, None).await;
    assert_eq!(current["kits_used"], 2);

    let (status, _) = send(&app, "GET", &format!("/v1/subscriptions/active?user_id={user}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscription_funded_order() {
    let app = test_app();
    let user = Uuid::new_v4();

    // No subscription yet.
    let (status, body) = send(
        &app,
        "POST",
        "/v1/kit-orders",
        Some(json!({ "user_id": user, "purchase_type": "subscription", "delivery": delivery() })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ENTITLEMENT_EXHAUSTED");

    let (_, sub) = create_subscription(&app, user, "one_time").await;
    let (status, order) = send(
        &app,
        "POST",
        "/v1/kit-orders",
        Some(json!({ "user_id": user, "purchase_type": "subscription", "delivery": delivery() })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["subscription_id"], sub["id"]);

    let (_, after) = send(&app, "GET", &format!("/v1/subscriptions/{}", sub["id"].as_str().unwrap()), None, None).await;
    assert_eq!(after["kits_used"], 1);
    assert_eq!(after["status"], "expired");
}

#[tokio::test]
async fn test_second_active_subscription_conflicts() {
    let app = test_app();
    let user = Uuid::new_v4();
    let (status, _) = create_subscription(&app, user, "annual_high").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = create_subscription(&app, user, "annual_moderate").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_cancel_twice() {
    let app = test_app();
    let (_, sub) = create_subscription(&app, Uuid::new_v4(), "annual_high").await;
    let id = sub["id"].as_str().unwrap();

    let (status, body) = send(&app, "POST", &format!("/v1/subscriptions/{id}/cancel"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = send(&app, "POST", &format!("/v1/subscriptions/{id}/cancel"), None, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send(&app, "POST", &format!("/v1/subscriptions/{id}/use-kit"), None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ENTITLEMENT_EXHAUSTED");
}

#[tokio::test]
async fn test_unknown_tier_is_422() {
    let app = test_app();
    let (status, body) = create_subscription(&app, Uuid::new_v4(), "platinum").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["message"].as_str().unwrap().contains("annual_high"));
}

#[tokio::test]
async fn test_concurrent_use_kit_over_http() {
    let app = test_app();
    let (_, sub) = create_subscription(&app, Uuid::new_v4(), "annual_high").await;
    let id = sub["id"].as_str().unwrap().to_string();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = app.clone();
        let uri = format!("/v1/subscriptions/{id}/use-kit");
        handles.push(tokio::spawn(async move {
            send(&app, "POST", &uri, None, None).await.0
        }));
    }
    let mut ok = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => exhausted += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 4);
    assert_eq!(exhausted, 6);
}

// -- Consultations ------------------------------------------------------------

#[tokio::test]
async fn test_consultation_confirmation_and_reminder() {
    let app = test_app();
    let (status, doctor) = send(
        &app,
        "POST",
        "/v1/doctors",
        Some(json!({ "name": "Dr. Sana Malik", "specialty": "endocrinology" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, consultation) = send(
        &app,
        "POST",
        "/v1/consultations",
        Some(json!({ "user_id": Uuid::new_v4(), "preferred_dates": ["2026-11-02"], "preferred_time_slot": "morning" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(consultation["status"], "received");
    let id = consultation["id"].as_str().unwrap();
    let uri = format!("/v1/consultations/{id}/status");

    // Scheduling is only accepted with `confirmed`.
    let (status, _) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "status": "coordinating", "doctor_id": doctor["id"] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "coordinating" })), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, confirmed) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({
            "status": "confirmed",
            "scheduled_at": "2026-11-02T09:30:00Z",
            "doctor_id": doctor["id"],
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["doctor_id"], doctor["id"]);

    let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "reminder_sent" })), None).await;
    assert_eq!(status, StatusCode::OK);

    // reminder_sent is terminal.
    let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "confirmed" })), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/v1/consultations/{id}/doctor"),
        Some(json!({ "doctor_id": doctor["id"] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_deactivated_doctor_is_not_assignable() {
    let app = test_app();
    let (_, doctor) = send(&app, "POST", "/v1/doctors", Some(json!({ "name": "Dr. Imran Butt" })), None).await;
    let doctor_id = doctor["id"].as_str().unwrap();
    let (_, consultation) = send(&app, "POST", "/v1/consultations", Some(json!({ "user_id": Uuid::new_v4() })), None).await;
    let id = consultation["id"].as_str().unwrap();

    let (status, body) = send(&app, "POST", &format!("/v1/doctors/{doctor_id}/deactivate"), None, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["active"], false);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/v1/consultations/{id}/doctor"),
        Some(json!({ "doctor_id": doctor_id })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "POST", &format!("/v1/doctors/{}/deactivate", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clients_cannot_move_consultations() {
    let app = test_app_with_auth("s3cret");
    let client = format!("client:{}:s3cret", Uuid::new_v4());
    let (status, consultation) = send(&app, "POST", "/v1/consultations", Some(json!({})), Some(&client)).await;
    assert_eq!(status, StatusCode::CREATED, "{consultation}");
    let id = consultation["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/v1/consultations/{id}/status"),
        Some(json!({ "status": "coordinating" })),
        Some(&client),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", &format!("/v1/consultations/{id}"), None, Some(&client)).await;
    assert_eq!(status, StatusCode::OK);
}

// -- Pricing & Settings -------------------------------------------------------

#[tokio::test]
async fn test_kit_price_follows_settings() {
    let app = test_app();
    let (status, price) = send(&app, "GET", "/v1/pricing/kit", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(price["price"], "470.00");
    assert_eq!(price["base_price"], "350.00");
    assert_eq!(price["shipping_fee"], "120.00");

    let (status, body) = send(
        &app,
        "PUT",
        "/v1/settings/kit.base_price",
        Some(json!({ "value": "310.00" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, price) = send(&app, "GET", "/v1/pricing/kit", None, None).await;
    assert_eq!(price["price"], "430.00");

    let order = create_one_time_order(&app, Uuid::new_v4()).await;
    assert_eq!(order["price"], "430.00");
}

#[tokio::test]
async fn test_negative_setting_rejected() {
    let app = test_app();
    let (status, _) = send(
        &app,
        "PUT",
        "/v1/settings/kit.shipping_fee",
        Some(json!({ "value": "-5" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_settings_are_admin_only() {
    let app = test_app_with_auth("s3cret");
    let client = format!("client:{}:s3cret", Uuid::new_v4());
    let (status, _) = send(
        &app,
        "PUT",
        "/v1/settings/kit.base_price",
        Some(json!({ "value": "1.00" })),
        Some(&client),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", "/v1/pricing/kit", None, Some(&client)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_count_transitions() {
    let app = test_app();
    let order = create_one_time_order(&app, Uuid::new_v4()).await;
    let id = order["id"].as_str().unwrap();
    set_status(&app, id, "shipping").await;
    set_status(&app, id, "received").await;

    let (status, metrics) = send(&app, "GET", "/v1/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["transitions_accepted"], 1);
    assert_eq!(metrics["transitions_rejected"], 1);
    assert!(metrics["requests"].as_u64().unwrap() >= 3);
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_document_served() {
    let app = test_app();
    let (status, spec) = send(&app, "GET", "/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(spec["info"]["title"], "Kitcare API");
    assert!(spec["paths"]["/v1/kit-orders/{id}/status"].is_object());
}
