//! Voucher validation.
//!
//! [`evaluate`] is pure: it never touches the usage counter. Claiming a use
//! happens in the store, conditionally, when the order is written.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::aggregates::{CustomerRanking, DiscountKind, Voucher};
use crate::domain::value_objects::{round_money, VoucherCode};
use crate::store::Store;
use crate::{Result, VoucherError};

/// Checks `voucher` against an order context and returns the discount.
///
/// Rules are checked in a fixed order so the first failing rule is the one
/// reported: existence, validity window, minimum subtotal, remaining uses,
/// ranking.
pub fn evaluate(
    voucher: Option<&Voucher>,
    subtotal: Decimal,
    ranking: Option<CustomerRanking>,
    now: DateTime<Utc>,
    scale: u32,
) -> std::result::Result<Decimal, VoucherError> {
    let voucher = voucher.filter(|v| v.is_active()).ok_or(VoucherError::NotFound)?;
    if !voucher.is_within_window(now) { return Err(VoucherError::Expired); }
    if subtotal < voucher.min_order_value() {
        return Err(VoucherError::BelowMinimum { minimum: voucher.min_order_value() });
    }
    if !voucher.has_remaining_uses() { return Err(VoucherError::UsageExhausted); }
    if let Some(required) = voucher.required_ranking() {
        if ranking.map_or(true, |held| held < required) {
            return Err(VoucherError::RankingNotEligible { required });
        }
    }
    Ok(discount_for(voucher.discount(), subtotal, scale))
}

/// Discount for a subtotal, never more than the subtotal itself.
pub fn discount_for(kind: &DiscountKind, subtotal: Decimal, scale: u32) -> Decimal {
    let raw = match kind {
        DiscountKind::Percentage { percent, max_discount } => {
            let amount = round_money(subtotal * *percent / Decimal::ONE_HUNDRED, scale);
            max_discount.map_or(amount, |cap| amount.min(cap))
        }
        DiscountKind::FixedAmount { amount } => *amount,
    };
    raw.max(Decimal::ZERO).min(subtotal)
}

/// Looks up the voucher and the customer's ranking, then runs [`evaluate`].
#[derive(Clone)]
pub struct VoucherValidator {
    store: Arc<dyn Store>,
    scale: u32,
}

impl VoucherValidator {
    pub fn new(store: Arc<dyn Store>, scale: u32) -> Self { Self { store, scale } }

    #[instrument(skip(self))]
    pub async fn validate(&self, code: &VoucherCode, subtotal: Decimal, customer_id: Option<&str>, now: DateTime<Utc>) -> Result<Decimal> {
        let voucher = self.store.voucher(code).await?;
        let ranking = match (customer_id, voucher.as_ref().and_then(Voucher::required_ranking)) {
            (Some(customer), Some(_)) => self.store.customer_ranking(customer).await?,
            _ => None,
        };
        let discount = evaluate(voucher.as_ref(), subtotal, ranking, now, self.scale)?;
        debug!(%discount, "Voucher accepted");
        Ok(discount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sale10() -> Voucher {
        let now = Utc::now();
        Voucher::create(
            VoucherCode::new("SALE10").unwrap(),
            DiscountKind::Percentage { percent: dec!(10), max_discount: None },
            dec!(100000), now - Duration::days(1), now + Duration::days(1), 100,
        )
    }

    #[test]
    fn test_percentage_discount() {
        assert_eq!(evaluate(Some(&sale10()), dec!(500000), None, Utc::now(), 0), Ok(dec!(50000)));
    }

    #[test]
    fn test_voucher_not_started_is_expired() {
        let now = Utc::now();
        let v = Voucher::create(
            VoucherCode::new("LATER").unwrap(),
            DiscountKind::FixedAmount { amount: dec!(10000) },
            Decimal::ZERO, now + Duration::hours(1), now + Duration::days(7), 10,
        );
        assert_eq!(evaluate(Some(&v), dec!(500000), None, now, 0), Err(VoucherError::Expired));
        assert_eq!(evaluate(Some(&v), dec!(500000), None, now + Duration::hours(2), 0), Ok(dec!(10000)));
    }

    #[test]
    fn test_percentage_discount_is_capped() {
        let mut v = sale10();
        v.discount = DiscountKind::Percentage { percent: dec!(10), max_discount: Some(dec!(20000)) };
        assert_eq!(evaluate(Some(&v), dec!(500000), None, Utc::now(), 0), Ok(dec!(20000)));
    }

    #[test]
    fn test_fixed_discount_clamped_to_subtotal() {
        let mut v = sale10();
        v.discount = DiscountKind::FixedAmount { amount: dec!(300000) };
        v.min_order_value = Decimal::ZERO;
        assert_eq!(evaluate(Some(&v), dec!(200000), None, Utc::now(), 0), Ok(dec!(200000)));
    }

    #[test]
    fn test_rules() {
        let now = Utc::now();
        assert_eq!(evaluate(None, dec!(500000), None, now, 0), Err(VoucherError::NotFound));

        let mut inactive = sale10();
        inactive.deactivate();
        assert_eq!(evaluate(Some(&inactive), dec!(500000), None, now, 0), Err(VoucherError::NotFound));

        assert_eq!(evaluate(Some(&sale10()), dec!(500000), None, now + Duration::days(2), 0), Err(VoucherError::Expired));
        assert_eq!(evaluate(Some(&sale10()), dec!(99999), None, now, 0), Err(VoucherError::BelowMinimum { minimum: dec!(100000) }));
        assert_eq!(evaluate(Some(&sale10().with_current_uses(100)), dec!(500000), None, now, 0), Err(VoucherError::UsageExhausted));
    }

    #[test]
    fn test_ranking_gate() {
        let now = Utc::now();
        let v = sale10().with_required_ranking(CustomerRanking::Gold);
        let required = CustomerRanking::Gold;
        assert_eq!(evaluate(Some(&v), dec!(500000), None, now, 0), Err(VoucherError::RankingNotEligible { required }));
        assert_eq!(evaluate(Some(&v), dec!(500000), Some(CustomerRanking::Silver), now, 0), Err(VoucherError::RankingNotEligible { required }));
        assert_eq!(evaluate(Some(&v), dec!(500000), Some(CustomerRanking::Diamond), now, 0), Ok(dec!(50000)));
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let v = sale10();
        let now = Utc::now();
        let first = evaluate(Some(&v), dec!(123457), None, now, 0);
        assert_eq!(first, evaluate(Some(&v), dec!(123457), None, now, 0));
        assert_eq!(v.current_uses(), 0);
    }
}
