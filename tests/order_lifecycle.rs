mod common;

use rust_decimal::Decimal;

use std::sync::Arc;

use common::{FlakyCommits, Harness};
use ecommerce_checkout::domain::aggregates::{OrderError, OrderStatus, StockReason};
use ecommerce_checkout::domain::value_objects::{OrderId, UserId};
use ecommerce_checkout::services::{PaymentOutcome, RedirectParams, ResultPage};
use ecommerce_checkout::EcommerceError;

#[tokio::test]
async fn test_end_to_end_paid_then_cancelled() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let user = h.buyer(&[(p, 3)]);

    let session = h.services.checkout.create_preference(user).await.unwrap();
    let order = h.order(session.order_id).await;
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.total().amount(), Decimal::new(30, 0));
    assert_eq!(order.preference_id(), Some(session.id.as_str()));
    assert!(!h.store.cart(user).unwrap().is_empty(), "cart stays until payment");

    h.gateway.settle("pay-1", Some(&session.order_id.to_string()), "approved");
    let outcome = h.services.lifecycle.handle_webhook("pay-1").await.unwrap();
    assert_eq!(outcome, PaymentOutcome::Confirmed);

    let order = h.order(session.order_id).await;
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(order.payment().payment_id.as_deref(), Some("pay-1"));
    assert_eq!(h.stock(p), 7);
    let ledger = h.store.ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!((ledger[0].product_id, ledger[0].delta, ledger[0].reason), (p, -3, StockReason::Sale));
    let cart = h.store.cart(user).unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.total, Decimal::ZERO);

    let admin = UserId::new();
    let order = h.services.lifecycle.update_status(session.order_id, "cancelled", admin).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock(p), 10);
    let ledger = h.store.ledger();
    assert_eq!(ledger.len(), 2);
    assert_eq!((ledger[1].delta, ledger[1].reason, ledger[1].actor), (3, StockReason::Cancellation, Some(admin)));
    assert_eq!(h.ledger_sum(p), 0);
}

#[tokio::test]
async fn test_duplicate_webhooks_deduct_once() {
    let h = Harness::new();
    let (a, b) = (h.product(5, 20), h.product(7, 20));
    let user = h.buyer(&[(a, 2), (b, 4)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-dup", Some(&session.order_id.to_string()), "approved");

    assert_eq!(h.services.lifecycle.handle_webhook("pay-dup").await.unwrap(), PaymentOutcome::Confirmed);
    assert_eq!(
        h.services.lifecycle.handle_webhook("pay-dup").await.unwrap(),
        PaymentOutcome::AlreadySettled(OrderStatus::Paid)
    );

    assert_eq!((h.stock(a), h.stock(b)), (18, 16));
    let sales: Vec<_> = h.store.ledger().into_iter().filter(|e| e.reason == StockReason::Sale).collect();
    assert_eq!(sales.len(), 2);
}

#[tokio::test]
async fn test_concurrent_webhook_and_redirect_deduct_once() {
    let h = Harness::new();
    let p = h.product(10, 50);
    let user = h.buyer(&[(p, 5)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-race", Some(&session.order_id.to_string()), "approved");

    let redirect = RedirectParams {
        payment_id: Some("pay-race".into()),
        status: Some("approved".into()),
        preference_id: Some(session.id.clone()),
    };
    let (page, webhook, again) = tokio::join!(
        h.services.lifecycle.handle_redirect(&redirect),
        h.services.lifecycle.handle_webhook("pay-race"),
        h.services.lifecycle.handle_webhook("pay-race"),
    );

    assert_eq!(page, ResultPage::Success);
    assert!(webhook.is_ok() && again.is_ok());
    assert_eq!(h.stock(p), 45);
    assert_eq!(h.store.ledger().len(), 1);
}

#[tokio::test]
async fn test_cancel_pending_order_touches_no_stock() {
    let h = Harness::new();
    let p = h.product(10, 4);
    let user = h.buyer(&[(p, 2)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();

    let order = h.services.lifecycle.update_status(session.order_id, "cancelled", UserId::new()).await.unwrap();

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock(p), 4);
    assert!(h.store.ledger().is_empty());
}

#[tokio::test]
async fn test_clamping_records_effective_delta() {
    let h = Harness::new();
    let p = h.product(10, 2);
    let user = h.buyer(&[(p, 5)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-clamp", Some(&session.order_id.to_string()), "approved");

    h.services.lifecycle.handle_webhook("pay-clamp").await.unwrap();
    assert_eq!(h.stock(p), 0);
    assert_eq!(h.store.ledger()[0].delta, -2);

    // Cancellation gives back what was actually taken.
    h.services.lifecycle.update_status(session.order_id, "cancelled", UserId::new()).await.unwrap();
    assert_eq!(h.stock(p), 2);
    assert_eq!(h.store.ledger()[1].delta, 2);
    assert_eq!(h.ledger_sum(p), 0);
}

#[tokio::test]
async fn test_ledger_reconciles_with_stock() {
    let h = Harness::new();
    let p = h.product(3, 6);
    let initial = h.stock(p);

    for qty in [4, 4, 1] {
        let user = h.buyer(&[(p, qty)]);
        let session = h.services.checkout.create_preference(user).await.unwrap();
        let payment_id = format!("pay-{qty}-{}", session.order_id);
        h.gateway.settle(&payment_id, Some(&session.order_id.to_string()), "approved");
        h.services.lifecycle.handle_webhook(&payment_id).await.unwrap();
        assert_eq!(h.stock(p), initial + h.ledger_sum(p));
    }
    assert_eq!(h.stock(p), 0);
}

#[tokio::test]
async fn test_unknown_gateway_status_keeps_order_pending() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let user = h.buyer(&[(p, 1)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-med", Some(&session.order_id.to_string()), "in_mediation");

    assert_eq!(h.services.lifecycle.handle_webhook("pay-med").await.unwrap(), PaymentOutcome::Waiting);

    let order = h.order(session.order_id).await;
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.payment().gateway_status.as_deref(), Some("in_mediation"));
    assert!(order.payment().gateway_payload.is_some());
    assert_eq!(h.stock(p), 10);
    assert!(h.store.ledger().is_empty());
}

#[tokio::test]
async fn test_rejected_payment_allows_retry() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let user = h.buyer(&[(p, 1)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    let order_ref = session.order_id.to_string();

    h.gateway.settle("pay-r1", Some(&order_ref), "rejected");
    let page = h
        .services
        .lifecycle
        .handle_redirect(&RedirectParams {
            payment_id: Some("pay-r1".into()),
            status: Some("rejected".into()),
            preference_id: Some(session.id.clone()),
        })
        .await;
    assert_eq!(page, ResultPage::Failure);
    let order = h.order(session.order_id).await;
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.payment().gateway_status.as_deref(), Some("rejected"));

    h.gateway.settle("pay-r2", Some(&order_ref), "approved");
    h.services.lifecycle.handle_webhook("pay-r2").await.unwrap();
    assert_eq!(h.order(session.order_id).await.status(), OrderStatus::Paid);
    assert_eq!(h.stock(p), 9);
}

#[tokio::test]
async fn test_redirect_verifies_approval_with_gateway() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let user = h.buyer(&[(p, 1)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    let params = RedirectParams {
        payment_id: Some("pay-v".into()),
        status: Some("approved".into()),
        preference_id: Some(session.id.clone()),
    };

    // Browser claims approval but the gateway cannot confirm yet.
    h.gateway.fail_payment_lookups(true);
    assert_eq!(h.services.lifecycle.handle_redirect(&params).await, ResultPage::Pending);
    assert_eq!(h.order(session.order_id).await.status(), OrderStatus::Pending);

    // Gateway says the payment is still in process.
    h.gateway.fail_payment_lookups(false);
    h.gateway.settle("pay-v", Some(&session.order_id.to_string()), "in_process");
    assert_eq!(h.services.lifecycle.handle_redirect(&params).await, ResultPage::Pending);
    assert_eq!(h.stock(p), 10);

    h.gateway.settle("pay-v", Some(&session.order_id.to_string()), "approved");
    assert_eq!(h.services.lifecycle.handle_redirect(&params).await, ResultPage::Success);
    assert_eq!(h.order(session.order_id).await.status(), OrderStatus::Paid);
    assert_eq!(h.stock(p), 9);
}

#[tokio::test]
async fn test_redirect_for_unknown_preference_is_a_no_op() {
    let h = Harness::new();
    let params = RedirectParams {
        payment_id: Some("pay-x".into()),
        status: Some("approved".into()),
        preference_id: Some("pref-unknown".into()),
    };
    assert_eq!(h.services.lifecycle.handle_redirect(&params).await, ResultPage::Success);
    assert_eq!(h.services.lifecycle.handle_redirect(&RedirectParams::default()).await, ResultPage::Failure);
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn test_webhook_without_order_reference_is_ignored() {
    let h = Harness::new();
    h.gateway.settle("pay-foreign", None, "approved");
    h.gateway.settle("pay-bad-ref", Some("not-a-uuid"), "approved");
    h.gateway.settle("pay-gone", Some(&OrderId::new().to_string()), "approved");

    for id in ["pay-foreign", "pay-bad-ref", "pay-gone", "pay-never-registered"] {
        assert_eq!(h.services.lifecycle.handle_webhook(id).await.unwrap(), PaymentOutcome::Ignored);
    }
}

#[tokio::test]
async fn test_webhook_gateway_failure_is_an_error() {
    let h = Harness::new();
    h.gateway.fail_payment_lookups(true);
    let err = h.services.lifecycle.handle_webhook("pay-1").await.unwrap_err();
    assert!(matches!(err, EcommerceError::Gateway(_)));
}

#[tokio::test]
async fn test_administrative_transitions() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let user = h.buyer(&[(p, 1)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    let id = session.order_id;
    let admin = UserId::new();

    let err = h.services.lifecycle.update_status(id, "paid", admin).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Order(OrderError::RequiresPayment)));
    let err = h.services.lifecycle.update_status(id, "lost_in_space", admin).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Order(OrderError::InvalidStatus(_))));
    let err = h.services.lifecycle.update_status(id, "shipped", admin).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Order(OrderError::InvalidTransition { .. })));

    h.gateway.settle("pay-adm", Some(&id.to_string()), "approved");
    h.services.lifecycle.handle_webhook("pay-adm").await.unwrap();

    for status in ["prepared", "shipped", "shipped", "delivered"] {
        let order = h.services.lifecycle.update_status(id, status, admin).await.unwrap();
        assert_eq!(order.status().as_str(), status);
    }
    let err = h.services.lifecycle.update_status(id, "cancelled", admin).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Order(OrderError::Terminal(OrderStatus::Delivered))));
    assert_eq!(h.stock(p), 9);
    assert_eq!(h.store.ledger().len(), 1);

    let missing = h.services.lifecycle.update_status(OrderId::new(), "shipped", admin).await;
    assert!(matches!(missing, Err(EcommerceError::OrderNotFound(_))));
}

#[tokio::test]
async fn test_cancellation_skips_deleted_products() {
    let h = Harness::new();
    let (kept, deleted) = (h.product(10, 10), h.product(10, 10));
    let user = h.buyer(&[(kept, 2), (deleted, 3)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-del", Some(&session.order_id.to_string()), "approved");
    h.services.lifecycle.handle_webhook("pay-del").await.unwrap();

    h.store.remove_product(deleted);
    let order = h.services.lifecycle.update_status(session.order_id, "cancelled", UserId::new()).await.unwrap();

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock(kept), 10);
    assert_eq!(h.store.ledger().iter().filter(|e| e.reason == StockReason::Cancellation).count(), 1);
}

#[tokio::test]
async fn test_notifications_follow_the_order() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let user = h.buyer(&[(p, 1)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-n", Some(&session.order_id.to_string()), "approved");
    h.services.lifecycle.handle_webhook("pay-n").await.unwrap();
    h.services.lifecycle.update_status(session.order_id, "prepared", UserId::new()).await.unwrap();

    let subjects = h.outbox.subjects();
    assert_eq!(subjects.len(), 3);
    assert!(subjects[0].starts_with("We received your order"));
    assert!(subjects[1].starts_with("Payment confirmed"));
    assert!(subjects[2].ends_with("is now being prepared"));
}

#[tokio::test]
async fn test_failed_commit_leaves_order_pending_for_the_retry() {
    let h = Harness::with_orders(|store| Arc::new(FlakyCommits::new(store, 1)));
    let (a, b) = (h.product(10, 20), h.product(10, 20));
    let user = h.buyer(&[(a, 2), (b, 4)]);
    let session = h.services.checkout.create_preference(user).await.unwrap();
    h.gateway.settle("pay-flaky", Some(&session.order_id.to_string()), "approved");

    let err = h.services.lifecycle.handle_webhook("pay-flaky").await.unwrap_err();
    assert!(matches!(err, EcommerceError::Storage(_)));
    assert_eq!(h.order(session.order_id).await.status(), OrderStatus::Pending);
    assert_eq!((h.stock(a), h.stock(b)), (20, 20));
    assert!(h.store.ledger().is_empty());
    assert!(!h.store.cart(user).unwrap().is_empty());

    // The gateway delivers again and the whole transition lands.
    assert_eq!(h.services.lifecycle.handle_webhook("pay-flaky").await.unwrap(), PaymentOutcome::Confirmed);
    assert_eq!(h.order(session.order_id).await.status(), OrderStatus::Paid);
    assert_eq!((h.stock(a), h.stock(b)), (18, 16));
    assert_eq!(h.store.ledger().len(), 2);
    assert!(h.store.cart(user).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_cancellation_restores_nothing() {
    let mut flaky = None;
    let h = Harness::with_orders(|store| {
        let orders = Arc::new(FlakyCommits::new(store, 0));
        flaky = Some(orders.clone());
        orders
    });
    let flaky = flaky.unwrap();
    let p = h.product(10, 10);
    let session = h.services.checkout.create_preference(h.buyer(&[(p, 3)])).await.unwrap();
    h.gateway.settle("pay-c", Some(&session.order_id.to_string()), "approved");
    h.services.lifecycle.handle_webhook("pay-c").await.unwrap();
    assert_eq!(h.stock(p), 7);

    let admin = UserId::new();
    flaky.fail_next(1);
    assert!(h.services.lifecycle.update_status(session.order_id, "cancelled", admin).await.is_err());
    assert_eq!(h.order(session.order_id).await.status(), OrderStatus::Paid);
    assert_eq!(h.stock(p), 7);
    assert_eq!(h.store.ledger().len(), 1);

    let cancelled = h.services.lifecycle.update_status(session.order_id, "cancelled", admin).await.unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock(p), 10);
    assert_eq!(h.ledger_sum(p), 0);
}

#[tokio::test]
async fn test_redirect_with_another_orders_payment_is_refused() {
    let h = Harness::new();
    let (cheap, pricey) = (h.product(1, 10), h.product(1000, 10));
    let cheap_session = h.services.checkout.create_preference(h.buyer(&[(cheap, 1)])).await.unwrap();
    let pricey_session = h.services.checkout.create_preference(h.buyer(&[(pricey, 1)])).await.unwrap();
    h.gateway.settle("101", Some(&cheap_session.order_id.to_string()), "approved");

    let page = h
        .services
        .lifecycle
        .handle_redirect(&RedirectParams {
            payment_id: Some("101".into()),
            status: Some("approved".into()),
            preference_id: Some(pricey_session.id.clone()),
        })
        .await;

    assert_eq!(page, ResultPage::Failure);
    let pricey_order = h.order(pricey_session.order_id).await;
    assert_eq!(pricey_order.status(), OrderStatus::Pending);
    assert_eq!(pricey_order.payment().payment_id, None);
    assert_eq!(h.stock(pricey), 10);

    // The payment still settles the order it was made for.
    assert_eq!(h.services.lifecycle.handle_webhook("101").await.unwrap(), PaymentOutcome::Confirmed);
    assert_eq!(h.order(cheap_session.order_id).await.status(), OrderStatus::Paid);
    assert_eq!(h.stock(cheap), 9);
}

#[tokio::test]
async fn test_redirect_cannot_overwrite_a_settled_order() {
    let h = Harness::new();
    let p = h.product(10, 10);
    let session = h.services.checkout.create_preference(h.buyer(&[(p, 1)])).await.unwrap();
    h.gateway.settle("202", Some(&session.order_id.to_string()), "approved");
    h.services.lifecycle.handle_webhook("202").await.unwrap();

    let page = h
        .services
        .lifecycle
        .handle_redirect(&RedirectParams {
            payment_id: Some("999".into()),
            status: Some("rejected".into()),
            preference_id: Some(session.id.clone()),
        })
        .await;

    assert_eq!(page, ResultPage::Failure);
    let order = h.order(session.order_id).await;
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(order.payment().payment_id.as_deref(), Some("202"));
    assert_eq!(order.payment().gateway_status.as_deref(), Some("approved"));
    assert_eq!(order.payment().gateway_payload.as_ref().map(|p| p["id"].clone()), Some(serde_json::json!("202")));
}
