mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use storefront_checkout::store::Store;
use storefront_checkout::{
    CustomerRanking, DiscountKind, Error, GatewayError, InventoryError, OrderStatus, PaymentMethod, PaymentStatus,
    Voucher, VoucherCode, VoucherError,
};

use common::{harness, request};

#[tokio::test]
async fn test_checkout_with_sale10() {
    let h = harness();
    let receipt = h.state.checkout.checkout(request(h.product.id(), 2, Some("SALE10"))).await.unwrap();

    let order = &receipt.order;
    assert_eq!(order.subtotal(), dec!(500000));
    assert_eq!(order.discount(), dec!(50000));
    assert_eq!(order.tax(), dec!(45000));
    assert_eq!(order.total(), dec!(495000));
    assert_eq!(order.total(), order.subtotal() - order.discount() + order.tax());
    assert_eq!(order.status(), OrderStatus::Created);

    let payment = receipt.payment.expect("online order has a payment handle");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, dec!(495000));
    assert_eq!(order.payment_ref(), Some(payment.gateway_order_code));

    let txn = h.store.transaction_by_code(payment.gateway_order_code).await.unwrap().unwrap();
    assert_eq!(txn.status(), PaymentStatus::Pending);
    assert_eq!(txn.order_id(), order.id());

    assert_eq!(h.store.product(h.product.id()).unwrap().stock(), 8);
    let voucher = h.store.voucher(&VoucherCode::new("SALE10").unwrap()).await.unwrap().unwrap();
    assert_eq!(voucher.current_uses(), 1);
    assert_eq!(h.notifier.count("order.created"), 1);
}

#[tokio::test]
async fn test_unknown_voucher_fails_without_order() {
    let h = harness();
    let err = h.state.checkout.checkout(request(h.product.id(), 2, Some("NOPE"))).await.unwrap_err();
    assert_matches!(err, Error::Voucher(VoucherError::NotFound));
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.store.product(h.product.id()).unwrap().stock(), 10);
    assert_eq!(h.gateway.link_count(), 0);
}

#[tokio::test]
async fn test_voucher_below_minimum_is_reported() {
    let h = harness();
    let cheap = storefront_checkout::Product::create("SOCKS", "Socks", dec!(50000), 5);
    h.store.add_product(cheap.clone());
    let err = h.state.checkout.checkout(request(cheap.id(), 1, Some("sale10"))).await.unwrap_err();
    assert_matches!(err, Error::Voucher(VoucherError::BelowMinimum { minimum }) if minimum == dec!(100000));
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn test_client_price_is_ignored() {
    let h = harness();
    let mut req = request(h.product.id(), 1, None);
    req.items[0].unit_price = Some(dec!(1));
    let receipt = h.state.checkout.checkout(req).await.unwrap();
    assert_eq!(receipt.order.subtotal(), dec!(250000));
    assert_eq!(receipt.order.items()[0].unit_price, dec!(250000));
}

#[tokio::test]
async fn test_price_snapshot_survives_catalog_change() {
    let h = harness();
    let receipt = h.state.checkout.checkout(request(h.product.id(), 1, None)).await.unwrap();
    h.store.update_price(h.product.id(), dec!(999999));
    let order = h.state.orders.order(receipt.order.id()).await.unwrap();
    assert_eq!(order.items()[0].unit_price, dec!(250000));
    assert_eq!(order.total(), receipt.order.total());
}

#[tokio::test]
async fn test_out_of_stock() {
    let h = harness();
    let err = h.state.checkout.checkout(request(h.product.id(), 11, None)).await.unwrap_err();
    assert_matches!(err, Error::Inventory(InventoryError::OutOfStock { requested: 11, available: 10, .. }));
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn test_gateway_failure_cancels_order_and_releases_holds() {
    let h = harness();
    h.gateway.fail_next_create(GatewayError::Unreachable("connection refused".into()));

    let err = h.state.checkout.checkout(request(h.product.id(), 2, Some("SALE10"))).await.unwrap_err();
    assert_matches!(err, Error::Gateway(GatewayError::Unreachable(_)));

    let orders = h.store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status(), OrderStatus::Cancelled);
    assert_eq!(orders[0].payment_ref(), None);
    assert_eq!(h.store.transaction_count(), 0);
    assert_eq!(h.store.product(h.product.id()).unwrap().stock(), 10);
    let voucher = h.store.voucher(&VoucherCode::new("SALE10").unwrap()).await.unwrap().unwrap();
    assert_eq!(voucher.current_uses(), 0);
    assert!(h.notifier.events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_voucher_use_goes_to_one_checkout() {
    let h = harness();
    let now = Utc::now();
    h.store.add_voucher(Voucher::create(
        VoucherCode::new("LASTONE").unwrap(),
        DiscountKind::FixedAmount { amount: dec!(20000) },
        dec!(0), now - Duration::hours(1), now + Duration::hours(1), 5,
    ).with_current_uses(4));

    let (a, b) = tokio::join!(
        h.state.checkout.checkout(request(h.product.id(), 1, Some("LASTONE"))),
        h.state.checkout.checkout(request(h.product.id(), 1, Some("LASTONE"))),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(Error::Voucher(VoucherError::UsageExhausted)))));

    let voucher = h.store.voucher(&VoucherCode::new("LASTONE").unwrap()).await.unwrap().unwrap();
    assert_eq!(voucher.current_uses(), 5);
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.product(h.product.id()).unwrap().stock(), 9);
}

#[tokio::test]
async fn test_cash_on_delivery_skips_gateway() {
    let h = harness();
    let mut req = request(h.product.id(), 1, None);
    req.payment_method = PaymentMethod::CashOnDelivery;
    let receipt = h.state.checkout.checkout(req).await.unwrap();
    assert!(receipt.payment.is_none());
    assert_eq!(receipt.order.status(), OrderStatus::Created);
    assert_eq!(h.gateway.link_count(), 0);
}

#[tokio::test]
async fn test_fully_discounted_order_is_confirmed_without_payment() {
    let h = harness();
    let now = Utc::now();
    h.store.add_voucher(Voucher::create(
        VoucherCode::new("FREEBIE").unwrap(),
        DiscountKind::FixedAmount { amount: dec!(1000000) },
        dec!(0), now - Duration::hours(1), now + Duration::hours(1), 10,
    ));
    let receipt = h.state.checkout.checkout(request(h.product.id(), 1, Some("FREEBIE"))).await.unwrap();
    assert_eq!(receipt.order.total(), dec!(0));
    assert_eq!(receipt.order.status(), OrderStatus::Confirmed);
    assert!(receipt.payment.is_none());
    assert_eq!(h.notifier.count("order.confirmed"), 1);
}

#[tokio::test]
async fn test_ranking_restricted_voucher() {
    let h = harness();
    let now = Utc::now();
    h.store.add_voucher(Voucher::create(
        VoucherCode::new("GOLD20").unwrap(),
        DiscountKind::Percentage { percent: dec!(20), max_discount: Some(dec!(30000)) },
        dec!(0), now - Duration::hours(1), now + Duration::hours(1), 10,
    ).with_required_ranking(CustomerRanking::Gold));

    h.store.set_ranking("C1", CustomerRanking::Silver);
    let err = h.state.checkout.checkout(request(h.product.id(), 1, Some("GOLD20"))).await.unwrap_err();
    assert_matches!(err, Error::Voucher(VoucherError::RankingNotEligible { required: CustomerRanking::Gold }));

    h.store.set_ranking("C1", CustomerRanking::Platinum);
    let receipt = h.state.checkout.checkout(request(h.product.id(), 1, Some("GOLD20"))).await.unwrap();
    assert_eq!(receipt.order.discount(), dec!(30000));
}

#[tokio::test]
async fn test_preview_voucher_does_not_claim_a_use() {
    let h = harness();
    let quote = h.state.checkout.preview_voucher("SALE10", Some("C1"), dec!(500000)).await.unwrap();
    assert_eq!(quote.discount, dec!(50000));
    assert_eq!(quote.subtotal_after_discount, dec!(450000));
    let again = h.state.checkout.preview_voucher("SALE10", Some("C1"), dec!(500000)).await.unwrap();
    assert_eq!(again.discount, quote.discount);

    let voucher = h.store.voucher(&VoucherCode::new("SALE10").unwrap()).await.unwrap().unwrap();
    assert_eq!(voucher.current_uses(), 0);
}
