use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use super::{Page, Store, StoreError, StoreResult, Swap};
use crate::domain::aggregates::{
    CustomerRanking, DiscountKind, LineItem, Order, OrderStatus, PaymentMethod, PaymentStatus, PaymentTransaction, Product,
    ProductStatus, ShippingInfo, Voucher,
};
use crate::domain::value_objects::{GatewayOrderCode, Quantity, VoucherCode};

const ONE_OPEN_PER_ORDER: &str = "payment_transactions_one_open_per_order";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| StoreError::Database(e.into()))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }

    async fn load_order(&self, row: OrderRow) -> StoreResult<Order> {
        let items = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY position")
            .bind(row.id).fetch_all(&self.pool).await?;
        row.into_order(items)
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, sku: String, name: String, price: Decimal, stock: i32, status: String, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct VoucherRow {
    id: Uuid, code: String, discount_type: String, discount_value: Decimal, max_discount: Option<Decimal>,
    min_order_value: Decimal, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>, max_uses: i32, current_uses: i32,
    required_ranking: Option<String>, active: bool,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, customer_id: String, email: String, status: String, payment_method: String,
    shipping: Json<ShippingInfo>, voucher_code: Option<String>, currency: String, subtotal: Decimal, discount: Decimal,
    tax: Decimal, total: Decimal, payment_ref: Option<i64>, cancellation_reason: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { product_id: Uuid, sku: String, name: String, unit_price: Decimal, quantity: i32, total: Decimal }

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid, order_id: Uuid, gateway_order_code: i64, amount: Decimal, status: String, gateway_status: Option<String>,
    checkout_url: String, cancellation_reason: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

fn corrupt(what: impl std::fmt::Display) -> StoreError { StoreError::Corrupt(what.to_string()) }

fn to_u32(value: i32, field: &str) -> StoreResult<u32> { u32::try_from(value).map_err(|_| corrupt(format!("{field} = {value}"))) }

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> StoreResult<Self> {
        Ok(Product { id: r.id, sku: r.sku, name: r.name, price: r.price, stock: to_u32(r.stock, "stock")?, status: ProductStatus::parse(&r.status), updated_at: r.updated_at })
    }
}

impl TryFrom<VoucherRow> for Voucher {
    type Error = StoreError;
    fn try_from(r: VoucherRow) -> StoreResult<Self> {
        let discount = match r.discount_type.as_str() {
            "PERCENTAGE" => DiscountKind::Percentage { percent: r.discount_value, max_discount: r.max_discount },
            "FIXED_AMOUNT" => DiscountKind::FixedAmount { amount: r.discount_value },
            other => return Err(corrupt(format!("discount_type = {other}"))),
        };
        Ok(Voucher {
            id: r.id, code: VoucherCode::new(r.code).map_err(corrupt)?, discount, min_order_value: r.min_order_value,
            starts_at: r.starts_at, ends_at: r.ends_at, max_uses: to_u32(r.max_uses, "max_uses")?,
            current_uses: to_u32(r.current_uses, "current_uses")?,
            required_ranking: r.required_ranking.map(|s| s.parse::<CustomerRanking>()).transpose().map_err(corrupt)?, active: r.active,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> StoreResult<Order> {
        let items = items.into_iter().map(|i| {
            let quantity = Quantity::new(to_u32(i.quantity, "quantity")?).map_err(corrupt)?;
            Ok(LineItem { product_id: i.product_id, sku: i.sku, name: i.name, unit_price: i.unit_price, quantity, total: i.total })
        }).collect::<StoreResult<Vec<_>>>()?;
        Ok(Order {
            id: self.id, order_number: self.order_number, customer_id: self.customer_id, email: self.email,
            status: self.status.parse::<OrderStatus>().map_err(corrupt)?,
            payment_method: self.payment_method.parse::<PaymentMethod>().map_err(corrupt)?,
            items, shipping: self.shipping.0, voucher_code: self.voucher_code.map(VoucherCode::new).transpose().map_err(corrupt)?,
            currency: self.currency, subtotal: self.subtotal, discount: self.discount, tax: self.tax, total: self.total,
            payment_ref: self.payment_ref.map(GatewayOrderCode::new), cancellation_reason: self.cancellation_reason,
            created_at: self.created_at, updated_at: self.updated_at, events: vec![],
        })
    }
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = StoreError;
    fn try_from(r: TransactionRow) -> StoreResult<Self> {
        Ok(PaymentTransaction {
            id: r.id, order_id: r.order_id, gateway_order_code: GatewayOrderCode::new(r.gateway_order_code), amount: r.amount,
            status: r.status.parse::<PaymentStatus>().map_err(corrupt)?, gateway_status: r.gateway_status, checkout_url: r.checkout_url,
            cancellation_reason: r.cancellation_reason, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

fn swap(rows: u64) -> Swap { if rows == 0 { Swap::Stale } else { Swap::Applied } }

#[async_trait]
impl Store for PgStore {
    async fn products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1)")
            .bind(ids).fetch_all(&self.pool).await?
            .into_iter().map(Product::try_from).collect()
    }

    async fn voucher(&self, code: &VoucherCode) -> StoreResult<Option<Voucher>> {
        sqlx::query_as::<_, VoucherRow>("SELECT * FROM vouchers WHERE code = $1")
            .bind(code.as_str()).fetch_optional(&self.pool).await?
            .map(Voucher::try_from).transpose()
    }

    async fn customer_ranking(&self, customer_id: &str) -> StoreResult<Option<CustomerRanking>> {
        let ranking: Option<String> = sqlx::query_scalar("SELECT ranking FROM customer_rankings WHERE customer_id = $1")
            .bind(customer_id).fetch_optional(&self.pool).await?;
        ranking.map(|r| r.parse::<CustomerRanking>()).transpose().map_err(corrupt)
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO orders (id, order_number, customer_id, email, status, payment_method, shipping, voucher_code, currency, subtotal, discount, tax, total, payment_ref, cancellation_reason, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NULL, NULL, $14, $15)")
            .bind(order.id()).bind(order.order_number()).bind(order.customer_id()).bind(order.email())
            .bind(order.status().as_str()).bind(order.payment_method().as_str()).bind(Json(order.shipping()))
            .bind(order.voucher_code().map(VoucherCode::as_str)).bind(order.currency())
            .bind(order.subtotal()).bind(order.discount()).bind(order.tax()).bind(order.total())
            .bind(order.created_at()).bind(order.updated_at())
            .execute(&mut *tx).await?;

        for (position, item) in order.items().iter().enumerate() {
            let qty = item.quantity.value() as i32;
            sqlx::query("INSERT INTO order_items (order_id, position, product_id, sku, name, unit_price, quantity, total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
                .bind(order.id()).bind(position as i32).bind(item.product_id).bind(&item.sku).bind(&item.name)
                .bind(item.unit_price).bind(qty).bind(item.total)
                .execute(&mut *tx).await?;

            let reserved = sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND status = 'active' AND stock >= $2")
                .bind(item.product_id).bind(qty).execute(&mut *tx).await?;
            if reserved.rows_affected() == 0 {
                let available: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
                    .bind(item.product_id).fetch_optional(&mut *tx).await?;
                return Err(StoreError::OutOfStock { product_id: item.product_id, requested: item.quantity.value(), available: available.unwrap_or(0).max(0) as u32 });
            }
        }

        if let Some(code) = order.voucher_code() {
            let claimed = sqlx::query("UPDATE vouchers SET current_uses = current_uses + 1 WHERE code = $1 AND current_uses < max_uses")
                .bind(code.as_str()).execute(&mut *tx).await?;
            if claimed.rows_affected() == 0 {
                return Err(StoreError::VoucherExhausted(code.to_string()));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.load_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn swap_order_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<Swap> {
        let res = sqlx::query("UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id).bind(from.as_str()).bind(to.as_str()).execute(&self.pool).await?;
        Ok(swap(res.rows_affected()))
    }

    async fn cancel_order(&self, id: Uuid, from: OrderStatus, reason: &str) -> StoreResult<Swap> {
        let mut tx = self.pool.begin().await?;
        let voucher_code: Option<Option<String>> = sqlx::query_scalar("UPDATE orders SET status = 'CANCELLED', cancellation_reason = $3, updated_at = NOW() WHERE id = $1 AND status = $2 RETURNING voucher_code")
            .bind(id).bind(from.as_str()).bind(reason).fetch_optional(&mut *tx).await?;
        let Some(voucher_code) = voucher_code else { return Ok(Swap::Stale) };

        sqlx::query("UPDATE products p SET stock = p.stock + i.quantity, updated_at = NOW() FROM order_items i WHERE i.order_id = $1 AND p.id = i.product_id")
            .bind(id).execute(&mut *tx).await?;
        if let Some(code) = voucher_code {
            sqlx::query("UPDATE vouchers SET current_uses = current_uses - 1 WHERE code = $1 AND current_uses > 0")
                .bind(code).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(Swap::Applied)
    }

    async fn insert_transaction(&self, txn: &PaymentTransaction) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query("INSERT INTO payment_transactions (id, order_id, gateway_order_code, amount, status, gateway_status, checkout_url, cancellation_reason, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $9)")
            .bind(txn.id()).bind(txn.order_id()).bind(txn.gateway_order_code().value()).bind(txn.amount())
            .bind(txn.status().as_str()).bind(txn.gateway_status()).bind(txn.checkout_url())
            .bind(txn.created_at()).bind(txn.updated_at())
            .execute(&mut *tx).await;
        match inserted {
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ONE_OPEN_PER_ORDER) => {
                return Err(StoreError::OpenTransactionExists(txn.order_id()));
            }
            other => { other?; }
        }
        let linked = sqlx::query("UPDATE orders SET payment_ref = $2, updated_at = NOW() WHERE id = $1")
            .bind(txn.order_id()).bind(txn.gateway_order_code().value()).execute(&mut *tx).await?;
        if linked.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", txn.order_id())));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transaction_by_code(&self, code: GatewayOrderCode) -> StoreResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM payment_transactions WHERE gateway_order_code = $1")
            .bind(code.value()).fetch_optional(&self.pool).await?
            .map(PaymentTransaction::try_from).transpose()
    }

    async fn open_transaction_for_order(&self, order_id: Uuid) -> StoreResult<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM payment_transactions WHERE order_id = $1 AND status IN ('PENDING', 'PROCESSING')")
            .bind(order_id).fetch_optional(&self.pool).await?
            .map(PaymentTransaction::try_from).transpose()
    }

    async fn swap_transaction_status(&self, id: Uuid, from: PaymentStatus, to: PaymentStatus, gateway_status: &str, reason: Option<&str>) -> StoreResult<Swap> {
        let res = sqlx::query("UPDATE payment_transactions SET status = $3, gateway_status = $4, cancellation_reason = COALESCE($5, cancellation_reason), updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id).bind(from.as_str()).bind(to.as_str()).bind(gateway_status).bind(reason)
            .execute(&self.pool).await?;
        Ok(swap(res.rows_affected()))
    }

    async fn record_gateway_status(&self, id: Uuid, gateway_status: &str) -> StoreResult<()> {
        sqlx::query("UPDATE payment_transactions SET gateway_status = $2, updated_at = NOW() WHERE id = $1 AND gateway_status IS DISTINCT FROM $2")
            .bind(id).bind(gateway_status).execute(&self.pool).await?;
        Ok(())
    }

    async fn open_transactions(&self) -> StoreResult<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM payment_transactions WHERE status IN ('PENDING', 'PROCESSING') ORDER BY created_at")
            .fetch_all(&self.pool).await?
            .into_iter().map(PaymentTransaction::try_from).collect()
    }

    async fn transactions(&self, page: u32, per_page: u32) -> StoreResult<Page<PaymentTransaction>> {
        let offset = (page.max(1) - 1) as i64 * per_page as i64;
        let items = sqlx::query_as::<_, TransactionRow>("SELECT * FROM payment_transactions ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2")
            .bind(per_page as i64).bind(offset).fetch_all(&self.pool).await?
            .into_iter().map(PaymentTransaction::try_from).collect::<StoreResult<Vec<_>>>()?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_transactions").fetch_one(&self.pool).await?;
        Ok(Page { items, total: total.max(0) as u64 })
    }
}
