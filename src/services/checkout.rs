//! Checkout orchestration.
//!
//! Re-price the cart, apply the voucher, write the order (stock and voucher
//! use are claimed in the same write), then open the gateway transaction. If
//! the gateway step fails the order is cancelled, which hands back the stock
//! and the voucher use, so no order is left waiting on a payment that does
//! not exist.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

use crate::config::PricingConfig;
use crate::domain::aggregates::{Cart, CartItem, Order, OrderDraft, OrderStatus, PaymentMethod, ShippingInfo};
use crate::domain::value_objects::VoucherCode;
use crate::services::orders::OrderLifecycle;
use crate::services::payments::{PaymentAdapter, PaymentHandle};
use crate::services::voucher::VoucherValidator;
use crate::store::Store;
use crate::{Error, Result, VoucherError};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomerInfo {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate]
    pub customer: CustomerInfo,
    #[validate]
    pub shipping: ShippingInfo,
    #[validate(length(min = 1, max = 100))]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub voucher_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    /// Absent for cash on delivery and for orders with nothing to pay.
    pub payment: Option<PaymentHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoucherQuote {
    pub code: VoucherCode,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub subtotal_after_discount: Decimal,
}

pub struct CheckoutService {
    store: Arc<dyn Store>,
    vouchers: VoucherValidator,
    payments: Arc<PaymentAdapter>,
    orders: Arc<OrderLifecycle>,
    pricing: PricingConfig,
}

/// Codes that cannot even be parsed cannot name a voucher.
fn parse_code(raw: &str) -> Result<VoucherCode> {
    VoucherCode::new(raw).map_err(|_| VoucherError::NotFound.into())
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Store>, payments: Arc<PaymentAdapter>, orders: Arc<OrderLifecycle>, pricing: PricingConfig) -> Self {
        let vouchers = VoucherValidator::new(store.clone(), pricing.scale);
        Self { store, vouchers, payments, orders, pricing }
    }

    #[instrument(skip(self, request), fields(customer_id = %request.customer.id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        request.validate()?;

        let cart = Cart::from_items(request.items);
        let catalog: HashMap<_, _> = self.store.products(&cart.product_ids()).await?
            .into_iter()
            .map(|p| (p.id(), p))
            .collect();
        let items = cart.price(&catalog)?;
        let subtotal: Decimal = items.iter().map(|i| i.total).sum();

        let voucher = match request.voucher_code.as_deref() {
            Some(raw) => {
                let code = parse_code(raw)?;
                let discount = self.vouchers.validate(&code, subtotal, Some(request.customer.id.as_str()), Utc::now()).await?;
                Some((code, discount))
            }
            None => None,
        };

        let mut order = Order::place(OrderDraft {
            customer_id: request.customer.id,
            email: request.customer.email,
            payment_method: request.payment_method,
            items,
            shipping: request.shipping,
            voucher,
            currency: self.pricing.currency.clone(),
            tax_rate: self.pricing.tax_rate,
            scale: self.pricing.scale,
        }).map_err(|e| Error::Validation(e.to_string()))?;

        self.store.insert_order(&order).await?;
        info!(order_id = %order.id(), order_number = order.order_number(), total = %order.total(), "Order created");

        let payment = if order.payment_method().is_online() && order.total() > Decimal::ZERO {
            match self.payments.create_payment(order.id(), order.total(), order.order_number()).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(order_id = %order.id(), error = %e, "Payment could not be initiated, cancelling order");
                    if let Err(rollback) = self.orders.abandon(order.id(), "payment could not be initiated").await {
                        error!(order_id = %order.id(), error = %rollback, "Order rollback failed");
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.orders.announce(&mut order).await;
        if order.payment_method().is_online() && payment.is_none() {
            // Fully discounted: nothing to collect.
            self.orders.transition(order.id(), OrderStatus::Confirmed, None).await?;
        }

        let order = self.orders.order(order.id()).await?;
        Ok(CheckoutReceipt { order, payment })
    }

    /// Dry run of voucher validation; nothing is claimed.
    #[instrument(skip(self))]
    pub async fn preview_voucher(&self, code: &str, customer_id: Option<&str>, subtotal: Decimal) -> Result<VoucherQuote> {
        if subtotal.is_sign_negative() {
            return Err(Error::Validation("subtotal must not be negative".into()));
        }
        let code = parse_code(code)?;
        let discount = self.vouchers.validate(&code, subtotal, customer_id, Utc::now()).await?;
        Ok(VoucherQuote { code, subtotal, discount, subtotal_after_discount: subtotal - discount })
    }
}
