mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use storefront_checkout::api::router;
use storefront_checkout::gateway::{sign_fields, GatewayStatus};
use storefront_checkout::store::Store;
use storefront_checkout::{GatewayOrderCode, PaymentStatus};
use tower::ServiceExt;

use common::{harness, request_json, Harness, CHECKSUM_KEY};

async fn send(h: &Harness, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

async fn checkout(h: &Harness) -> Value {
    let (status, body) = send(h, "POST", "/api/v1/orders/checkout", Some(request_json(h.product.id(), 2, Some("SALE10")))).await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = send(&h, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_checkout_returns_order_and_payment() {
    let h = harness();
    let body = checkout(&h).await;
    assert_eq!(body["order"]["status"], "CREATED");
    assert_eq!(body["order"]["payment_method"], "BANK_TRANSFER");
    assert_eq!(body["payment"]["status"], "PENDING");
    assert!(body["payment"]["checkout_url"].as_str().unwrap().starts_with("https://pay.example/"));
}

#[tokio::test]
async fn test_checkout_errors_carry_codes() {
    let h = harness();
    let (status, body) = send(&h, "POST", "/api/v1/orders/checkout", Some(request_json(h.product.id(), 2, Some("BOGUS")))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VOUCHER_NOT_FOUND");

    let (status, body) = send(&h, "POST", "/api/v1/orders/checkout", Some(request_json(h.product.id(), 50, None))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "OUT_OF_STOCK");

    let (status, body) = send(&h, "POST", "/api/v1/orders/checkout", Some(json!({ "customer": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_validate_voucher() {
    let h = harness();
    let (status, body) = send(&h, "POST", "/api/v1/orders/validate-voucher", Some(json!({ "code": "SALE10", "subtotal": 500000 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["discount"], "50000");

    let (status, body) = send(&h, "POST", "/api/v1/orders/validate-voucher", Some(json!({ "code": "SALE10", "subtotal": 1000 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VOUCHER_BELOW_MINIMUM");
}

#[tokio::test]
async fn test_order_lookup_and_status_update() {
    let h = harness();
    let body = checkout(&h).await;
    let id = body["order"]["id"].as_str().unwrap().to_string();

    let (status, order) = send(&h, "GET", &format!("/api/v1/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["total"], "495000");

    let (status, body) = send(&h, "POST", &format!("/api/v1/orders/{id}/status"), Some(json!({ "status": "SHIPPING" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = send(&h, "POST", &format!("/api/v1/orders/{id}/status"), Some(json!({ "status": "CONFIRMED" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PAYMENT_NOT_SETTLED");

    let (status, body) = send(&h, "POST", &format!("/api/v1/orders/{id}/status"), Some(json!({ "status": "CANCELLED", "reason": "duplicate" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["cancellation_reason"], "duplicate");
    let code = GatewayOrderCode::new(body["payment_ref"].as_i64().unwrap());
    let txn = h.store.transaction_by_code(code).await.unwrap().unwrap();
    assert_eq!(txn.status(), PaymentStatus::Cancelled);

    let (status, _) = send(&h, "GET", "/api/v1/orders/0190a0c4-7a4e-7000-8000-0000000000ff", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_payment_reuses_open_transaction() {
    let h = harness();
    let body = checkout(&h).await;
    let (status, handle) = send(&h, "POST", "/api/v1/payments/create", Some(json!({ "order_id": body["order"]["id"] }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(handle["transaction_id"], body["payment"]["transaction_id"]);
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn test_verify_and_cancel() {
    let h = harness();
    let body = checkout(&h).await;
    let code = body["payment"]["gateway_order_code"].as_i64().unwrap();

    let (status, result) = send(&h, "GET", &format!("/api/v1/payments/verify/{code}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["transaction"]["status"], "PENDING");
    assert_eq!(result["reconciled"], true);

    h.gateway.set_status(GatewayOrderCode::new(code), GatewayStatus::Paid);
    let (status, body) = send(&h, "POST", &format!("/api/v1/payments/cancel/{code}"), Some(json!({ "reason": "changed mind" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_SETTLED");
}

#[tokio::test]
async fn test_transactions_are_paginated() {
    let h = harness();
    for _ in 0..3 { checkout(&h).await; }
    let (status, body) = send(&h, "GET", "/api/v1/payments/transactions?page=1&per_page=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_webhook_triggers_reconciliation() {
    let h = harness();
    let body = checkout(&h).await;
    let code = body["payment"]["gateway_order_code"].as_i64().unwrap();
    h.gateway.set_status(GatewayOrderCode::new(code), GatewayStatus::Paid);

    let signature = sign_fields(CHECKSUM_KEY, [
        ("amount", "495000".to_string()),
        ("code", "00".to_string()),
        ("orderCode", code.to_string()),
    ]).unwrap();
    let webhook = json!({
        "code": "00", "desc": "success", "signature": signature,
        "data": { "orderCode": code, "amount": 495000, "code": "00" }
    });

    let (status, _) = send(&h, "POST", "/api/v1/payments/webhook", Some(json!({
        "code": "00", "desc": "success", "signature": "00", "data": webhook["data"].clone()
    }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let txn = h.store.transaction_by_code(GatewayOrderCode::new(code)).await.unwrap().unwrap();
    assert_eq!(txn.status(), PaymentStatus::Pending);

    let (status, body) = send(&h, "POST", "/api/v1/payments/webhook", Some(webhook)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reconciled"], true);
    let txn = h.store.transaction_by_code(GatewayOrderCode::new(code)).await.unwrap().unwrap();
    assert_eq!(txn.status(), PaymentStatus::Completed);
}
