//! Cart Aggregate
//!
//! The cart a customer submits at checkout. Client-side prices are carried
//! for diagnostics only; [`Cart::price`] re-prices every line from the
//! catalog.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use crate::domain::aggregates::{LineItem, Product};
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: Quantity,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

#[derive(Clone, Debug, Default)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items { cart.add_item(item); }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn product_ids(&self) -> Vec<Uuid> { self.items.iter().map(|i| i.product_id).collect() }

    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity = existing.quantity.add(item.quantity);
        } else {
            self.items.push(item);
        }
    }

    /// Snapshots every line at the catalog's current price and checks stock.
    /// A stale client price is replaced silently; missing stock is an error.
    pub fn price(&self, catalog: &HashMap<Uuid, Product>) -> Result<Vec<LineItem>, CartError> {
        if self.is_empty() { return Err(CartError::Empty); }
        self.items.iter().map(|item| {
            let product = catalog.get(&item.product_id)
                .filter(|p| p.is_purchasable())
                .ok_or(CartError::UnknownProduct(item.product_id))?;
            if product.stock() < item.quantity.value() {
                return Err(CartError::OutOfStock { product_id: product.id(), requested: item.quantity.value(), available: product.stock() });
            }
            if let Some(client_price) = item.unit_price.filter(|p| *p != product.price()) {
                tracing::debug!(product_id = %product.id(), %client_price, catalog_price = %product.price(), "Client price replaced by catalog price");
            }
            Ok(LineItem::new(product.id(), product.sku(), product.name(), product.price(), item.quantity))
        }).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    Empty,
    UnknownProduct(Uuid),
    OutOfStock { product_id: Uuid, requested: u32, available: u32 },
}
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "cart is empty"),
            Self::UnknownProduct(id) => write!(f, "product {id} is not available for sale"),
            Self::OutOfStock { product_id, requested, available } => write!(f, "product {product_id}: requested {requested}, {available} available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(product_id: Uuid, qty: u32, price: Option<Decimal>) -> CartItem {
        CartItem { product_id, quantity: Quantity::new(qty).unwrap(), unit_price: price }
    }

    #[test]
    fn test_cart_merges_lines() {
        let id = Uuid::new_v4();
        let cart = Cart::from_items([item(id, 2, None), item(id, 1, None)]);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items()[0].quantity.value(), 3);
    }

    #[test]
    fn test_price_uses_catalog_price() {
        let product = Product::create("W1", "Widget", dec!(250000), 5);
        let catalog = HashMap::from([(product.id(), product.clone())]);
        let lines = Cart::from_items([item(product.id(), 2, Some(dec!(1)))]).price(&catalog).unwrap();
        assert_eq!(lines[0].unit_price, dec!(250000));
        assert_eq!(lines[0].total, dec!(500000));
    }

    #[test]
    fn test_price_rejects_insufficient_stock() {
        let product = Product::create("W1", "Widget", dec!(10), 1);
        let catalog = HashMap::from([(product.id(), product.clone())]);
        let err = Cart::from_items([item(product.id(), 2, None)]).price(&catalog).unwrap_err();
        assert_eq!(err, CartError::OutOfStock { product_id: product.id(), requested: 2, available: 1 });
    }

    #[test]
    fn test_price_rejects_unknown_product() {
        let missing = Uuid::new_v4();
        let err = Cart::from_items([item(missing, 1, None)]).price(&HashMap::new()).unwrap_err();
        assert_eq!(err, CartError::UnknownProduct(missing));
        assert_eq!(Cart::new().price(&HashMap::new()).unwrap_err(), CartError::Empty);
    }
}
