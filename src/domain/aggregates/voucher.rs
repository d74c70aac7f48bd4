//! Voucher Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::VoucherCode;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Voucher {
    pub(crate) id: Uuid,
    pub(crate) code: VoucherCode,
    pub(crate) discount: DiscountKind,
    pub(crate) min_order_value: Decimal,
    pub(crate) starts_at: DateTime<Utc>,
    pub(crate) ends_at: DateTime<Utc>,
    pub(crate) max_uses: u32,
    pub(crate) current_uses: u32,
    pub(crate) required_ranking: Option<CustomerRanking>,
    pub(crate) active: bool,
}

/// Discount shape. Percentages are whole percents (`10` means 10%).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    Percentage { percent: Decimal, max_discount: Option<Decimal> },
    FixedAmount { amount: Decimal },
}

/// Loyalty tier, maintained by the loyalty subsystem. Ordered lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerRanking { Bronze, Silver, Gold, Platinum, Diamond }

impl CustomerRanking {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "BRONZE",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Platinum => "PLATINUM",
            Self::Diamond => "DIAMOND",
        }
    }
}

impl fmt::Display for CustomerRanking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for CustomerRanking {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Bronze, Self::Silver, Self::Gold, Self::Platinum, Self::Diamond]
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown ranking {s}"))
    }
}

impl Voucher {
    pub fn create(code: VoucherCode, discount: DiscountKind, min_order_value: Decimal, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>, max_uses: u32) -> Self {
        Self {
            id: Uuid::now_v7(), code, discount, min_order_value, starts_at, ends_at, max_uses,
            current_uses: 0, required_ranking: None, active: true,
        }
    }

    pub fn with_required_ranking(mut self, ranking: CustomerRanking) -> Self {
        self.required_ranking = Some(ranking);
        self
    }

    pub fn with_current_uses(mut self, uses: u32) -> Self {
        self.current_uses = uses.min(self.max_uses);
        self
    }

    pub fn deactivate(&mut self) { self.active = false; }

    pub fn id(&self) -> Uuid { self.id }
    pub fn code(&self) -> &VoucherCode { &self.code }
    pub fn discount(&self) -> &DiscountKind { &self.discount }
    pub fn min_order_value(&self) -> Decimal { self.min_order_value }
    pub fn starts_at(&self) -> DateTime<Utc> { self.starts_at }
    pub fn ends_at(&self) -> DateTime<Utc> { self.ends_at }
    pub fn max_uses(&self) -> u32 { self.max_uses }
    pub fn current_uses(&self) -> u32 { self.current_uses }
    pub fn required_ranking(&self) -> Option<CustomerRanking> { self.required_ranking }
    pub fn is_active(&self) -> bool { self.active }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool { self.starts_at <= now && now <= self.ends_at }
    pub fn has_remaining_uses(&self) -> bool { self.current_uses < self.max_uses }

    /// Conditional increment: succeeds only while `current_uses < max_uses`.
    pub fn claim_use(&mut self) -> bool {
        if !self.has_remaining_uses() { return false; }
        self.current_uses += 1;
        true
    }

    pub fn release_use(&mut self) { self.current_uses = self.current_uses.saturating_sub(1); }
}
