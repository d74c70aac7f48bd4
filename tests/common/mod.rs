#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use storefront_checkout::api::AppState;
use storefront_checkout::config::AppConfig;
use storefront_checkout::gateway::{GatewayPayment, GatewayStatus, PaymentGateway, PaymentLink, PaymentLinkRequest};
use storefront_checkout::services::{CheckoutRequest, RecordingNotifier};
use storefront_checkout::store::MemoryStore;
use storefront_checkout::{DiscountKind, GatewayError, GatewayOrderCode, Product, Voucher, VoucherCode};

pub const CHECKSUM_KEY: &str = "checksum-secret";

/// In-process gateway whose answers the test decides.
#[derive(Default)]
pub struct ScriptedGateway {
    payments: Mutex<HashMap<GatewayOrderCode, (Decimal, GatewayStatus)>>,
    fail_create: Mutex<Option<GatewayError>>,
    fail_info: Mutex<Option<GatewayError>>,
    pub info_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn set_status(&self, code: GatewayOrderCode, status: GatewayStatus) {
        if let Some(entry) = self.payments.lock().get_mut(&code) { entry.1 = status; }
    }

    pub fn fail_next_create(&self, error: GatewayError) { *self.fail_create.lock() = Some(error); }

    pub fn fail_info(&self, error: Option<GatewayError>) { *self.fail_info.lock() = error; }

    pub fn link_count(&self) -> usize { self.payments.lock().len() }

    pub fn status(&self, code: GatewayOrderCode) -> Option<GatewayStatus> {
        self.payments.lock().get(&code).map(|(_, status)| status.clone())
    }

    fn info(&self, code: GatewayOrderCode) -> Result<GatewayPayment, GatewayError> {
        let payments = self.payments.lock();
        let (amount, status) = payments.get(&code).cloned()
            .ok_or_else(|| GatewayError::Rejected { code: "101".into(), message: "payment link not found".into() })?;
        let amount_paid = if status == GatewayStatus::Paid { amount } else { Decimal::ZERO };
        Ok(GatewayPayment { order_code: code, amount, amount_paid, status, cancellation_reason: None })
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink, GatewayError> {
        if let Some(error) = self.fail_create.lock().take() { return Err(error); }
        self.payments.lock().insert(request.order_code, (request.amount, GatewayStatus::Pending));
        Ok(PaymentLink {
            order_code: request.order_code,
            checkout_url: format!("https://pay.example/web/{}", request.order_code),
            status: GatewayStatus::Pending,
        })
    }

    async fn payment_info(&self, order_code: GatewayOrderCode) -> Result<GatewayPayment, GatewayError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_info.lock().clone() { return Err(error); }
        self.info(order_code)
    }

    async fn cancel_payment_link(&self, order_code: GatewayOrderCode, reason: &str) -> Result<GatewayPayment, GatewayError> {
        {
            let mut payments = self.payments.lock();
            let entry = payments.get_mut(&order_code)
                .ok_or_else(|| GatewayError::Rejected { code: "101".into(), message: "payment link not found".into() })?;
            if entry.1 == GatewayStatus::Paid {
                return Err(GatewayError::Rejected { code: "101".into(), message: "payment link already paid".into() });
            }
            entry.1 = GatewayStatus::Cancelled;
        }
        let mut info = self.info(order_code)?;
        info.cancellation_reason = Some(reason.to_string());
        Ok(info)
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: AppConfig,
    pub state: AppState,
    pub product: Product,
}

pub fn config() -> AppConfig {
    let vars: HashMap<&str, &str> = [
        ("PAYMENT_CLIENT_ID", "client"),
        ("PAYMENT_API_KEY", "api-key"),
        ("PAYMENT_CHECKSUM_KEY", CHECKSUM_KEY),
        ("PAYMENT_TIMEOUT_MS", "1000"),
        ("RECONCILE_INTERVAL_SECS", "1"),
        ("RECONCILE_MAX_ATTEMPTS", "3"),
    ].into_iter().collect();
    AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

/// 10% off, no cap, minimum order 100,000.
pub fn sale10(max_uses: u32) -> Voucher {
    let now = Utc::now();
    Voucher::create(
        VoucherCode::new("SALE10").unwrap(),
        DiscountKind::Percentage { percent: dec!(10), max_discount: None },
        dec!(100000), now - Duration::days(1), now + Duration::days(1), max_uses,
    )
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(ScriptedGateway::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let config = config();

    let product = Product::create("TSHIRT-01", "Cotton T-Shirt", dec!(250000), 10);
    store.add_product(product.clone());
    store.add_voucher(sale10(100));

    let state = AppState::new(store.clone(), gateway.clone(), notifier.clone(), &config);
    Harness { store, gateway, notifier, config, state, product }
}

pub fn request_json(product_id: Uuid, quantity: u32, voucher: Option<&str>) -> serde_json::Value {
    json!({
        "customer": { "id": "C1", "email": "c1@example.com" },
        "shipping": {
            "recipient_name": "Nguyen An", "phone": "0901234567",
            "address_line": "12 Hang Bai", "district": "Hoan Kiem", "city": "Hanoi"
        },
        "items": [{ "product_id": product_id, "quantity": quantity }],
        "payment_method": "BANK_TRANSFER",
        "voucher_code": voucher,
    })
}

pub fn request(product_id: Uuid, quantity: u32, voucher: Option<&str>) -> CheckoutRequest {
    serde_json::from_value(request_json(product_id, quantity, voucher)).unwrap()
}
