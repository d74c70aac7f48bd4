//! Value Objects for checkout and payments

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Voucher code value object. Codes are matched case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoucherCode(String);

impl VoucherCode {
    pub fn new(value: impl Into<String>) -> Result<Self, VoucherCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(VoucherCodeError::Empty); }
        if value.len() > 50 { return Err(VoucherCodeError::TooLong); }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(VoucherCodeError::InvalidCharacter);
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for VoucherCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for VoucherCode {
    type Error = VoucherCodeError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<VoucherCode> for String {
    fn from(code: VoucherCode) -> Self { code.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum VoucherCodeError { Empty, TooLong, InvalidCharacter }
impl std::error::Error for VoucherCodeError {}
impl fmt::Display for VoucherCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "voucher code empty"),
            Self::TooLong => write!(f, "voucher code too long"),
            Self::InvalidCharacter => write!(f, "voucher code contains invalid characters"),
        }
    }
}

/// Strictly positive line quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Result<Self, QuantityError> {
        if value == 0 { return Err(QuantityError::Zero); }
        Ok(Self(value))
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
}

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;
    fn try_from(value: u32) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self { q.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum QuantityError { Zero }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "quantity must be at least 1") }
}

/// Numeric order code assigned to a single payment attempt at the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayOrderCode(i64);

impl GatewayOrderCode {
    pub fn new(value: i64) -> Self { Self(value) }

    /// Millisecond timestamp with a random three digit suffix, which keeps
    /// codes unique across restarts without a shared sequence.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis() % 1_000_000_000_000;
        let suffix = rand::thread_rng().gen_range(0..1000);
        Self(millis * 1000 + suffix)
    }

    pub fn value(&self) -> i64 { self.0 }
}

impl fmt::Display for GatewayOrderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for GatewayOrderCode {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { s.trim().parse().map(Self) }
}

/// Rounds a monetary amount to the currency's minor unit.
pub fn round_money(amount: Decimal, scale: u32) -> Decimal {
    amount.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
