//! Product Aggregate
//!
//! Checkout only reads the catalog: the authoritative price and the stock
//! currently available for sale.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub(crate) id: Uuid,
    pub(crate) sku: String,
    pub(crate) name: String,
    pub(crate) price: Decimal,
    pub(crate) stock: u32,
    pub(crate) status: ProductStatus,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus { #[default] Draft, Active, Archived }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "draft", Self::Active => "active", Self::Archived => "archived" }
    }

    pub fn parse(s: &str) -> Self {
        match s { "active" => Self::Active, "archived" => Self::Archived, _ => Self::Draft }
    }
}

impl Product {
    /// Creates an active catalog entry.
    pub fn create(sku: impl Into<String>, name: impl Into<String>, price: Decimal, stock: u32) -> Self {
        Self {
            id: Uuid::now_v7(), sku: sku.into().trim().to_uppercase(), name: name.into(), price, stock,
            status: ProductStatus::Active, updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn sku(&self) -> &str { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn price(&self) -> Decimal { self.price }
    pub fn stock(&self) -> u32 { self.stock }
    pub fn status(&self) -> ProductStatus { self.status }
    pub fn is_purchasable(&self) -> bool { self.status == ProductStatus::Active }

    pub fn archive(&mut self) { self.status = ProductStatus::Archived; self.touch(); }

    pub fn update_price(&mut self, new_price: Decimal) {
        self.price = new_price;
        self.touch();
    }

    /// Takes `qty` units out of stock only if that many are available.
    pub fn reserve(&mut self, qty: u32) -> Result<(), ProductError> {
        self.stock = self.stock.checked_sub(qty).ok_or(ProductError::InsufficientStock { available: self.stock })?;
        self.touch();
        Ok(())
    }

    pub fn release(&mut self, qty: u32) {
        self.stock = self.stock.saturating_add(qty);
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { InsufficientStock { available: u32 } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::InsufficientStock { available } => write!(f, "insufficient stock, {available} available") }
    }
}
