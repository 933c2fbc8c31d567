//! Webhook reconciliation: idempotency, races, failure handling and refunds.

mod common;

use assert_matches::assert_matches;
use common::{admin, notification, operator, settlement, TestApp};
use rust_decimal_macros::dec;
use tailorcraft_api::errors::ServiceError;
use tailorcraft_api::models::{OperatorRole, OrderStatus, PaymentStatus};

#[tokio::test]
async fn duplicate_settlement_notifications_are_idempotent() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "IDm-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "IDm-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;

    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    let session = app
        .services
        .payments
        .initialize_payment(&customer, order.id)
        .await
        .unwrap();

    let first = app
        .services
        .payments
        .process_notification(settlement(&session.gateway_order_id))
        .await
        .unwrap();
    assert_eq!(first.payment_status, PaymentStatus::Paid.to_string());

    // Replay the same settlement.
    let second = app
        .services
        .payments
        .process_notification(settlement(&session.gateway_order_id))
        .await
        .unwrap();
    assert_eq!(second.payment_status, PaymentStatus::Paid.to_string());

    // Fabric sub-orders were created exactly once.
    let fabric_orders = app.services.fulfillment.list_for_order(order.id).await.unwrap();
    assert_eq!(fabric_orders.len(), 2);
}

#[tokio::test]
async fn late_challenge_or_deny_cannot_unwind_a_settled_order() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "OOO-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "OOO-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;

    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    let session = app
        .services
        .payments
        .initialize_payment(&customer, order.id)
        .await
        .unwrap();
    app.services
        .payments
        .process_notification(settlement(&session.gateway_order_id))
        .await
        .unwrap();

    // The gateway redelivers an earlier capture that had been challenged.
    let mut stale_challenge = notification(&session.gateway_order_id, "capture");
    stale_challenge.fraud_status = Some("challenge".to_string());
    let after_challenge = app
        .services
        .payments
        .process_notification(stale_challenge)
        .await
        .unwrap();
    assert_eq!(after_challenge.payment_status, PaymentStatus::Paid.to_string());

    // A stale deny is acknowledged the same way instead of erroring, so the
    // gateway stops retrying it.
    let after_deny = app
        .services
        .payments
        .process_notification(notification(&session.gateway_order_id, "deny"))
        .await
        .unwrap();
    assert_eq!(after_deny.payment_status, PaymentStatus::Paid.to_string());
    assert_eq!(after_deny.status, OrderStatus::FabricOrdering.to_string());

    let order_now = app.reload_order(order.id).await;
    assert_eq!(order_now.amount_paid, order_now.total_amount);
    assert_eq!(app.services.fulfillment.list_for_order(order.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_settlement_notifications_create_suborders_once() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "RCE-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "RCE-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;

    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    let session = app
        .services
        .payments
        .initialize_payment(&customer, order.id)
        .await
        .unwrap();

    let payments_a = app.services.payments.clone();
    let payments_b = app.services.payments.clone();
    let id_a = session.gateway_order_id.clone();
    let id_b = session.gateway_order_id.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { payments_a.process_notification(settlement(&id_a)).await }),
        tokio::spawn(async move { payments_b.process_notification(settlement(&id_b)).await }),
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let fabric_orders = app.services.fulfillment.list_for_order(order.id).await.unwrap();
    assert_eq!(fabric_orders.len(), 2);
    let order_now = app.reload_order(order.id).await;
    assert_eq!(order_now.amount_paid, order_now.total_amount);
}

#[tokio::test]
async fn denied_payment_reverts_order_to_pending() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "DNY-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "DNY-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;

    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    let session = app
        .services
        .payments
        .initialize_payment(&customer, order.id)
        .await
        .unwrap();
    assert_eq!(
        app.reload_order(order.id).await.status,
        OrderStatus::PaymentPending.to_string()
    );

    let denied = app
        .services
        .payments
        .process_notification(notification(&session.gateway_order_id, "deny"))
        .await
        .unwrap();
    assert_eq!(denied.status, OrderStatus::Pending.to_string());
    assert_eq!(denied.payment_status, PaymentStatus::Failed.to_string());

    // The customer can retry: a fresh session gets a fresh gateway order id.
    let retry = app
        .services
        .payments
        .initialize_payment(&customer, order.id)
        .await
        .unwrap();
    assert_ne!(retry.gateway_order_id, session.gateway_order_id);
}

#[tokio::test]
async fn challenged_capture_holds_fulfillment() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "CHL-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "CHL-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;

    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    let session = app
        .services
        .payments
        .initialize_payment(&customer, order.id)
        .await
        .unwrap();

    let mut challenge = notification(&session.gateway_order_id, "capture");
    challenge.fraud_status = Some("challenge".to_string());
    let held = app
        .services
        .payments
        .process_notification(challenge)
        .await
        .unwrap();

    assert_eq!(held.payment_status, PaymentStatus::Challenge.to_string());
    // No fulfillment while the capture is under review.
    assert_eq!(held.status, OrderStatus::PaymentPending.to_string());
    let fabric_orders = app.services.fulfillment.list_for_order(order.id).await.unwrap();
    assert!(fabric_orders.is_empty());
}

#[tokio::test]
async fn refund_cannot_exceed_amount_paid() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);
    let admin = admin();

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "RFD-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "RFD-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    let err = app
        .services
        .payments
        .refund(&admin, order.id, Some(order.amount_paid + dec!(1)), "too much")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(app.gateway.refund_count(), 0);
}

#[tokio::test]
async fn partial_refund_leaves_partially_refunded_payment() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);
    let admin = admin();

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "PRT-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "PRT-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    let refunded = app
        .services
        .payments
        .refund(&admin, order.id, Some(dec!(50000)), "goodwill")
        .await
        .unwrap();
    assert_eq!(
        refunded.payment_status,
        PaymentStatus::PartiallyRefunded.to_string()
    );
    assert_eq!(refunded.amount_paid, order.amount_paid - dec!(50000));
    assert_eq!(app.gateway.refund_count(), 1);
}

#[tokio::test]
async fn gateway_refund_failure_leaves_order_untouched() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);
    let admin = admin();

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "GWF-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "GWF-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    app.gateway
        .fail_refunds
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = app
        .services
        .payments
        .refund(&admin, order.id, None, "should fail")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GatewayError(_));

    let order_now = app.reload_order(order.id).await;
    assert_eq!(order_now.payment_status, PaymentStatus::Paid.to_string());
    assert_eq!(order_now.amount_paid, order.amount_paid);
}

#[tokio::test]
async fn expiry_sweep_reverts_only_stale_payment_pending_orders() {
    use chrono::{Duration, Utc};
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};
    use tailorcraft_api::entities::order;

    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "EXP-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "EXP-02", dec!(50000), dec!(10)).await;

    // Stale session: opened two days ago.
    let stale_design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let stale = app
        .services
        .orders
        .create_order(&customer, app.order_request(stale_design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    app.services
        .payments
        .initialize_payment(&customer, stale.id)
        .await
        .unwrap();
    let mut backdate: order::ActiveModel = app.reload_order(stale.id).await.into();
    backdate.updated_at = Set(Some(Utc::now() - Duration::hours(48)));
    backdate.update(&*app.db).await.unwrap();

    // Fresh session: opened just now.
    let fresh_design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let fresh = app
        .services
        .orders
        .create_order(&customer, app.order_request(fresh_design.id, tailor.id), dec!(25000))
        .await
        .unwrap();
    app.services
        .payments
        .initialize_payment(&customer, fresh.id)
        .await
        .unwrap();

    let expired = app.services.payments.expire_stale_payments().await.unwrap();
    assert_eq!(expired, 1);

    let stale_now = app.reload_order(stale.id).await;
    assert_eq!(stale_now.status, OrderStatus::Pending.to_string());
    assert_eq!(stale_now.payment_status, PaymentStatus::Failed.to_string());

    let fresh_now = app.reload_order(fresh.id).await;
    assert_eq!(fresh_now.status, OrderStatus::PaymentPending.to_string());
}

#[tokio::test]
async fn non_admin_cannot_refund() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "NAR-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "NAR-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    let err = app
        .services
        .payments
        .refund(&customer, order.id, None, "mine back")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}
