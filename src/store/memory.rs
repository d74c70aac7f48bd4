use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{Page, Store, StoreError, StoreResult, Swap};
use crate::domain::aggregates::{CustomerRanking, Order, OrderStatus, PaymentStatus, PaymentTransaction, Product, Voucher};
use crate::domain::value_objects::{GatewayOrderCode, VoucherCode};

/// Process-local store. One lock guards every record, so each trait method is
/// atomic with respect to every other.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    products: HashMap<Uuid, Product>,
    vouchers: HashMap<VoucherCode, Voucher>,
    rankings: HashMap<String, CustomerRanking>,
    orders: HashMap<Uuid, Order>,
    transactions: HashMap<Uuid, PaymentTransaction>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn add_product(&self, product: Product) { self.inner.lock().products.insert(product.id(), product); }

    pub fn add_voucher(&self, voucher: Voucher) { self.inner.lock().vouchers.insert(voucher.code().clone(), voucher); }

    pub fn set_ranking(&self, customer_id: impl Into<String>, ranking: CustomerRanking) {
        self.inner.lock().rankings.insert(customer_id.into(), ranking);
    }

    pub fn product(&self, id: Uuid) -> Option<Product> { self.inner.lock().products.get(&id).cloned() }

    pub fn update_price(&self, id: Uuid, price: rust_decimal::Decimal) {
        if let Some(p) = self.inner.lock().products.get_mut(&id) { p.update_price(price); }
    }

    pub fn order_count(&self) -> usize { self.inner.lock().orders.len() }

    /// Every stored order, oldest first.
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.inner.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub fn transaction_count(&self) -> usize { self.inner.lock().transactions.len() }
}

impl Inner {
    fn release_order_holds(&mut self, order: &Order) {
        for item in order.items() {
            if let Some(p) = self.products.get_mut(&item.product_id) { p.release(item.quantity.value()); }
        }
        if let Some(v) = order.voucher_code().and_then(|code| self.vouchers.get_mut(code)) { v.release_use(); }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let inner = self.inner.lock();
        Ok(ids.iter().filter_map(|id| inner.products.get(id).cloned()).collect())
    }

    async fn voucher(&self, code: &VoucherCode) -> StoreResult<Option<Voucher>> {
        Ok(self.inner.lock().vouchers.get(code).cloned())
    }

    async fn customer_ranking(&self, customer_id: &str) -> StoreResult<Option<CustomerRanking>> {
        Ok(self.inner.lock().rankings.get(customer_id).copied())
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let mut inner = self.inner.lock();

        // Check every hold before applying any of them.
        for item in order.items() {
            let product = inner.products.get(&item.product_id).ok_or_else(|| StoreError::NotFound(format!("product {}", item.product_id)))?;
            if product.stock() < item.quantity.value() {
                return Err(StoreError::OutOfStock { product_id: item.product_id, requested: item.quantity.value(), available: product.stock() });
            }
        }
        if let Some(code) = order.voucher_code() {
            let voucher = inner.vouchers.get(code).ok_or_else(|| StoreError::NotFound(format!("voucher {code}")))?;
            if !voucher.has_remaining_uses() { return Err(StoreError::VoucherExhausted(code.to_string())); }
        }

        for item in order.items() {
            if let Some(p) = inner.products.get_mut(&item.product_id) {
                p.reserve(item.quantity.value()).map_err(|_| StoreError::Corrupt(format!("stock for {}", item.product_id)))?;
            }
        }
        if let Some(v) = order.voucher_code().and_then(|code| inner.vouchers.get_mut(code)) { v.claim_use(); }

        let mut stored = order.clone();
        stored.events.clear();
        inner.orders.insert(order.id(), stored);
        Ok(())
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().orders.get(&id).cloned())
    }

    async fn swap_order_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<Swap> {
        let mut inner = self.inner.lock();
        let order = inner.orders.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        if order.status != from { return Ok(Swap::Stale); }
        order.status = to;
        order.touch();
        Ok(Swap::Applied)
    }

    async fn cancel_order(&self, id: Uuid, from: OrderStatus, reason: &str) -> StoreResult<Swap> {
        let mut inner = self.inner.lock();
        let order = inner.orders.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        if order.status != from { return Ok(Swap::Stale); }
        order.status = OrderStatus::Cancelled;
        order.cancellation_reason = Some(reason.to_string());
        order.touch();
        let snapshot = order.clone();
        inner.release_order_holds(&snapshot);
        Ok(Swap::Applied)
    }

    async fn insert_transaction(&self, txn: &PaymentTransaction) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.transactions.values().any(|t| t.order_id == txn.order_id && t.is_open()) {
            return Err(StoreError::OpenTransactionExists(txn.order_id));
        }
        let order = inner.orders.get_mut(&txn.order_id).ok_or_else(|| StoreError::NotFound(format!("order {}", txn.order_id)))?;
        order.payment_ref = Some(txn.gateway_order_code);
        order.touch();
        inner.transactions.insert(txn.id, txn.clone());
        Ok(())
    }

    async fn transaction_by_code(&self, code: GatewayOrderCode) -> StoreResult<Option<PaymentTransaction>> {
        Ok(self.inner.lock().transactions.values().find(|t| t.gateway_order_code == code).cloned())
    }

    async fn open_transaction_for_order(&self, order_id: Uuid) -> StoreResult<Option<PaymentTransaction>> {
        Ok(self.inner.lock().transactions.values().find(|t| t.order_id == order_id && t.is_open()).cloned())
    }

    async fn swap_transaction_status(&self, id: Uuid, from: PaymentStatus, to: PaymentStatus, gateway_status: &str, reason: Option<&str>) -> StoreResult<Swap> {
        let mut inner = self.inner.lock();
        let txn = inner.transactions.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;
        if txn.status != from { return Ok(Swap::Stale); }
        txn.status = to;
        txn.gateway_status = Some(gateway_status.to_string());
        if reason.is_some() { txn.cancellation_reason = reason.map(str::to_string); }
        txn.updated_at = Utc::now();
        Ok(Swap::Applied)
    }

    async fn record_gateway_status(&self, id: Uuid, gateway_status: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let txn = inner.transactions.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;
        if txn.gateway_status.as_deref() != Some(gateway_status) {
            txn.gateway_status = Some(gateway_status.to_string());
            txn.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn open_transactions(&self) -> StoreResult<Vec<PaymentTransaction>> {
        let mut open: Vec<_> = self.inner.lock().transactions.values().filter(|t| t.is_open()).cloned().collect();
        open.sort_by_key(|t| t.created_at);
        Ok(open)
    }

    async fn transactions(&self, page: u32, per_page: u32) -> StoreResult<Page<PaymentTransaction>> {
        let mut all: Vec<_> = self.inner.lock().transactions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = all.len() as u64;
        let skip = (page.max(1) - 1) as usize * per_page as usize;
        Ok(Page { items: all.into_iter().skip(skip).take(per_page as usize).collect(), total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{DiscountKind, LineItem, OrderDraft, PaymentMethod, ShippingInfo};
    use crate::domain::value_objects::Quantity;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn order_for(product: &Product, qty: u32, voucher: Option<&VoucherCode>) -> Order {
        Order::place(OrderDraft {
            customer_id: "C1".into(), email: "c1@example.com".into(), payment_method: PaymentMethod::BankTransfer,
            items: vec![LineItem::new(product.id(), product.sku(), product.name(), product.price(), Quantity::new(qty).unwrap())],
            shipping: ShippingInfo::default(), voucher: voucher.map(|c| (c.clone(), dec!(1))),
            currency: "VND".into(), tax_rate: dec!(0), scale: 0,
        }).unwrap()
    }

    #[tokio::test]
    async fn test_insert_order_is_all_or_nothing() {
        let store = MemoryStore::new();
        let product = Product::create("P1", "Widget", dec!(10), 5);
        store.add_product(product.clone());
        let code = VoucherCode::new("ONCE").unwrap();
        let now = Utc::now();
        store.add_voucher(Voucher::create(code.clone(), DiscountKind::FixedAmount { amount: dec!(1) }, dec!(0), now - Duration::days(1), now + Duration::days(1), 1).with_current_uses(1));

        let err = store.insert_order(&order_for(&product, 2, Some(&code))).await.unwrap_err();
        assert!(matches!(err, StoreError::VoucherExhausted(_)));
        assert_eq!(store.product(product.id()).unwrap().stock(), 5);
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_order_releases_stock() {
        let store = MemoryStore::new();
        let product = Product::create("P1", "Widget", dec!(10), 5);
        store.add_product(product.clone());
        let order = order_for(&product, 3, None);
        store.insert_order(&order).await.unwrap();
        assert_eq!(store.product(product.id()).unwrap().stock(), 2);

        assert_eq!(store.cancel_order(order.id(), OrderStatus::Created, "test").await.unwrap(), Swap::Applied);
        assert_eq!(store.product(product.id()).unwrap().stock(), 5);
        assert_eq!(store.cancel_order(order.id(), OrderStatus::Created, "test").await.unwrap(), Swap::Stale);
        assert_eq!(store.product(product.id()).unwrap().stock(), 5);
    }

    #[tokio::test]
    async fn test_single_open_transaction_per_order() {
        let store = MemoryStore::new();
        let product = Product::create("P1", "Widget", dec!(10), 5);
        store.add_product(product.clone());
        let order = order_for(&product, 1, None);
        store.insert_order(&order).await.unwrap();

        let first = PaymentTransaction::open(order.id(), GatewayOrderCode::new(1), dec!(10), "u", None);
        store.insert_transaction(&first).await.unwrap();
        let second = PaymentTransaction::open(order.id(), GatewayOrderCode::new(2), dec!(10), "u", None);
        assert!(matches!(store.insert_transaction(&second).await, Err(StoreError::OpenTransactionExists(_))));
        assert_eq!(store.order(order.id()).await.unwrap().unwrap().payment_ref(), Some(GatewayOrderCode::new(1)));
    }
}
