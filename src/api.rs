//! HTTP surface.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::aggregates::{Order, OrderStatus, PaymentTransaction};
use crate::domain::value_objects::GatewayOrderCode;
use crate::gateway::{PaymentGateway, WebhookPayload};
use crate::services::{
    CheckoutReceipt, CheckoutRequest, CheckoutService, Notifier, OrderLifecycle, PaymentAdapter, PaymentHandle,
    ReconciliationPoller, Reconciler, RefreshResult, VoucherQuote,
};
use crate::store::Store;
use crate::{Error, GatewayError};

/// Every collaborator a handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderLifecycle>,
    pub payments: Arc<PaymentAdapter>,
    pub reconciler: Arc<Reconciler>,
    checksum_key: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, notifier: Arc<dyn Notifier>, config: &AppConfig) -> Self {
        let orders = Arc::new(OrderLifecycle::new(store.clone(), notifier.clone()));
        let payments = Arc::new(PaymentAdapter::new(gateway, store.clone(), &config.gateway));
        let reconciler = Arc::new(Reconciler::new(store.clone(), payments.clone(), orders.clone(), notifier));
        let checkout = Arc::new(CheckoutService::new(store.clone(), payments.clone(), orders.clone(), config.pricing.clone()));
        Self { store, checkout, orders, payments, reconciler, checksum_key: config.gateway.checksum_key.as_str().into() }
    }

    /// Poller sharing this state's reconciler, so polls and on-demand
    /// refreshes see the same in-flight set.
    pub fn poller(&self, config: &AppConfig) -> ReconciliationPoller {
        ReconciliationPoller::new(
            self.reconciler.clone(),
            self.store.clone(),
            config.reconciliation.interval,
            config.reconciliation.max_attempts,
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-checkout"})) }))
        .route("/api/v1/orders/checkout", post(checkout))
        .route("/api/v1/orders/validate-voucher", post(validate_voucher))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", post(update_order_status))
        .route("/api/v1/payments/create", post(create_payment))
        .route("/api/v1/payments/verify/:code", get(verify_payment))
        .route("/api/v1/payments/cancel/:code", post(cancel_payment))
        .route("/api/v1/payments/transactions", get(list_transactions))
        .route("/api/v1/payments/webhook", post(payment_webhook))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub struct ApiError(Error);

#[derive(Serialize)]
struct ErrorBody { error: ErrorDetail }

#[derive(Serialize)]
struct ErrorDetail { code: &'static str, message: String }

impl From<Error> for ApiError {
    fn from(e: Error) -> Self { Self(e) }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self { Self(Error::Validation(r.body_text())) }
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Voucher(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Inventory(_) | Error::State(_) => StatusCode::CONFLICT,
        Error::Gateway(GatewayError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Error::Gateway(_) => StatusCode::BAD_GATEWAY,
        Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            Error::Storage(detail) => {
                error!(error = %detail, "Request failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: ErrorDetail { code: self.0.code(), message } })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Orders
// =============================================================================

async fn checkout(State(s): State<AppState>, payload: Result<Json<CheckoutRequest>, JsonRejection>) -> ApiResult<(StatusCode, Json<CheckoutReceipt>)> {
    let Json(request) = payload?;
    let receipt = s.checkout.checkout(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct ValidateVoucherRequest { pub code: String, pub subtotal: Decimal, pub customer_id: Option<String> }

async fn validate_voucher(State(s): State<AppState>, payload: Result<Json<ValidateVoucherRequest>, JsonRejection>) -> ApiResult<Json<VoucherQuote>> {
    let Json(r) = payload?;
    Ok(Json(s.checkout.preview_voucher(&r.code, r.customer_id.as_deref(), r.subtotal).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.order(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest { pub status: OrderStatus, pub reason: Option<String> }

async fn update_order_status(State(s): State<AppState>, Path(id): Path<Uuid>, payload: Result<Json<UpdateStatusRequest>, JsonRejection>) -> ApiResult<Json<Order>> {
    let Json(r) = payload?;
    Ok(Json(s.reconciler.update_order(id, r.status, r.reason).await?))
}

// =============================================================================
// Payments
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest { pub order_id: Uuid }

async fn create_payment(State(s): State<AppState>, payload: Result<Json<CreatePaymentRequest>, JsonRejection>) -> ApiResult<(StatusCode, Json<PaymentHandle>)> {
    let Json(r) = payload?;
    Ok((StatusCode::CREATED, Json(s.payments.create_payment_for_order(r.order_id).await?)))
}

async fn verify_payment(State(s): State<AppState>, Path(code): Path<GatewayOrderCode>) -> ApiResult<Json<RefreshResult>> {
    Ok(Json(s.reconciler.refresh(code).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelPaymentRequest { pub reason: Option<String> }

async fn cancel_payment(State(s): State<AppState>, Path(code): Path<GatewayOrderCode>, payload: Option<Json<CancelPaymentRequest>>) -> ApiResult<Json<PaymentTransaction>> {
    let reason = payload.and_then(|Json(r)| r.reason).unwrap_or_else(|| "cancelled by customer".to_string());
    Ok(Json(s.reconciler.cancel(code, &reason).await?))
}

#[derive(Debug, Deserialize)] pub struct ListParams { pub page: Option<u32>, pub per_page: Option<u32> }
#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: u64, pub page: u32, pub per_page: u32 }

async fn list_transactions(State(s): State<AppState>, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<PaymentTransaction>>> {
    let page = p.page.unwrap_or(1).max(1); let per_page = p.per_page.unwrap_or(20).clamp(1, 100);
    let result = s.store.transactions(page, per_page).await.map_err(Error::from)?;
    Ok(Json(PaginatedResponse { data: result.items, total: result.total, page, per_page }))
}

/// The webhook only names a transaction; its status is re-read from the
/// gateway rather than taken from the payload.
async fn payment_webhook(State(s): State<AppState>, payload: Result<Json<WebhookPayload>, JsonRejection>) -> ApiResult<Json<serde_json::Value>> {
    let Json(webhook) = payload?;
    let code = webhook.verify(&s.checksum_key).map_err(|e| Error::Validation(e.to_string()))?;
    info!(gateway_order_code = %code, gateway_code = %webhook.code, "Payment webhook received");
    match s.reconciler.refresh(code).await {
        Ok(result) => Ok(Json(serde_json::json!({ "success": true, "reconciled": result.reconciled }))),
        Err(Error::NotFound(_)) => {
            warn!(gateway_order_code = %code, "Webhook for unknown transaction");
            Ok(Json(serde_json::json!({ "success": true, "reconciled": false })))
        }
        Err(e) => Err(e.into()),
    }
}
