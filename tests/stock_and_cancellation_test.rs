//! Stock reservation edges and the cancellation cascade.

mod common;

use assert_matches::assert_matches;
use common::{operator, settlement, TestApp};
use rust_decimal_macros::dec;
use tailorcraft_api::errors::ServiceError;
use tailorcraft_api::models::{FabricOrderStatus, OperatorRole, OrderStatus, PaymentStatus};
use tailorcraft_api::services::OrderStatusService;

#[tokio::test]
async fn confirming_with_insufficient_stock_fails_and_reserves_nothing() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    // Body needs 2.0m but only 1.5m in stock.
    let body = app.seed_fabric(seller.id, "LOW-01", dec!(50000), dec!(1.5)).await;
    let sleeves = app.seed_fabric(seller.id, "LOW-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    let body_row = app
        .services
        .fulfillment
        .list_for_order(order.id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.fabric_id == body.id)
        .unwrap();

    let err = app
        .services
        .fulfillment
        .mark_ordered(&seller, body_row.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // Nothing was deducted and the sub-order is still pending.
    assert_eq!(app.reload_fabric(body.id).await.stock_meter, dec!(1.5));
    let rows = app.services.fulfillment.list_for_order(order.id).await.unwrap();
    let body_row = rows.iter().find(|r| r.fabric_id == body.id).unwrap();
    assert_eq!(body_row.status, FabricOrderStatus::Pending.to_string());
}

#[tokio::test]
async fn concurrent_confirmations_cannot_oversell_a_fabric() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    // Each order needs 2.0m of body fabric; 3.0m in stock covers only one.
    let body = app.seed_fabric(seller.id, "RSV-01", dec!(50000), dec!(3)).await;
    let sleeves = app.seed_fabric(seller.id, "RSV-02", dec!(50000), dec!(10)).await;

    let design_a = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let design_b = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order_a = app.paid_order(&customer, design_a.id, tailor.id).await;
    let order_b = app.paid_order(&customer, design_b.id, tailor.id).await;

    let body_row = |rows: Vec<tailorcraft_api::entities::order_fabric::Model>| {
        rows.into_iter().find(|r| r.fabric_id == body.id).unwrap()
    };
    let row_a = body_row(app.services.fulfillment.list_for_order(order_a.id).await.unwrap());
    let row_b = body_row(app.services.fulfillment.list_for_order(order_b.id).await.unwrap());

    let fulfillment_a = app.services.fulfillment.clone();
    let fulfillment_b = app.services.fulfillment.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { fulfillment_a.mark_ordered(&seller, row_a.id).await }),
        tokio::spawn(async move { fulfillment_b.mark_ordered(&seller, row_b.id).await }),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    // Exactly one reservation wins; the loser sees the shortage.
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let err = outcomes.into_iter().find_map(Result::err).unwrap();
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(app.reload_fabric(body.id).await.stock_meter, dec!(1));
}

#[tokio::test]
async fn cancellation_restores_stock_only_for_confirmed_suborders() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "CNL-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "CNL-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    // Confirm only the body fabric; its 2.0m gets reserved.
    let rows = app.services.fulfillment.list_for_order(order.id).await.unwrap();
    let body_row = rows.iter().find(|r| r.fabric_id == body.id).unwrap();
    app.services
        .fulfillment
        .mark_ordered(&seller, body_row.id)
        .await
        .unwrap();
    assert_eq!(app.reload_fabric(body.id).await.stock_meter, dec!(8));

    let cancelled = app
        .services
        .orders
        .cancel_order(&customer, order.id, "changed my mind")
        .await
        .unwrap();

    // The paid amount came back through the gateway in full.
    assert_eq!(app.gateway.refund_count(), 1);
    assert_eq!(cancelled.amount_paid, dec!(0));
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded.to_string());
    assert_eq!(cancelled.status, OrderStatus::Refunded.to_string());

    // Reserved meters restored; unconfirmed fabric untouched.
    assert_eq!(app.reload_fabric(body.id).await.stock_meter, dec!(10));
    assert_eq!(app.reload_fabric(sleeves.id).await.stock_meter, dec!(10));

    let rows = app.services.fulfillment.list_for_order(order.id).await.unwrap();
    assert!(rows
        .iter()
        .all(|r| r.status == FabricOrderStatus::Cancelled.to_string()));
}

#[tokio::test]
async fn unpaid_order_cancels_without_refund() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "UNP-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "UNP-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();

    let cancelled = app
        .services
        .orders
        .cancel_order(&customer, order.id, "typo in design")
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled.to_string());
    assert_eq!(app.gateway.refund_count(), 0);
}

#[tokio::test]
async fn cancellation_window_closes_when_fabric_arrives() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "WND-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "WND-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    for row in app.services.fulfillment.list_for_order(order.id).await.unwrap() {
        app.services.fulfillment.mark_ordered(&seller, row.id).await.unwrap();
    }
    // Order is now fabric_ordered; the cancellation window has closed.
    let err = app
        .services
        .orders
        .cancel_order(&customer, order.id, "too late")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IllegalTransition(_));
}

#[tokio::test]
async fn stale_cancellation_loses_to_a_concurrent_settlement() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "STL-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "STL-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();

    // A cancellation holds on to this read while the payment settles.
    let stale = app.reload_order(order.id).await;

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

    // The version filter rejects the write built from the stale read.
    let status = OrderStatusService::new(app.event_sender.clone());
    let err = status.cancel(&*app.db, stale, "changed my mind").await.unwrap_err();
    assert_matches!(err, ServiceError::ConcurrencyConflict(_));

    let order_now = app.reload_order(order.id).await;
    assert_eq!(order_now.status, OrderStatus::FabricOrdering.to_string());
    assert_eq!(order_now.payment_status, PaymentStatus::Paid.to_string());
    assert_eq!(order_now.amount_paid, order_now.total_amount);
}

#[tokio::test]
async fn a_design_can_only_be_ordered_once() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "ONC-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "ONC-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;

    app.services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap();

    let err = app
        .services
        .orders
        .create_order(&customer, app.order_request(design.id, tailor.id), dec!(25000))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ConcurrencyConflict(_) | ServiceError::ValidationError(_));
}

#[tokio::test]
async fn seller_cannot_confirm_anothers_suborder() {
    let app = TestApp::new().await;
    let customer = operator(OperatorRole::Customer);
    let seller = operator(OperatorRole::Seller);
    let other_seller = operator(OperatorRole::Seller);
    let tailor = operator(OperatorRole::Tailor);

    let template = app.seed_template().await;
    let body = app.seed_fabric(seller.id, "OTH-01", dec!(50000), dec!(10)).await;
    let sleeves = app.seed_fabric(seller.id, "OTH-02", dec!(50000), dec!(10)).await;
    let design = app.completed_design(&customer, &template, body.id, sleeves.id).await;
    let order = app.paid_order(&customer, design.id, tailor.id).await;

    let row = app
        .services
        .fulfillment
        .list_for_order(order.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let err = app
        .services
        .fulfillment
        .mark_ordered(&other_seller, row.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}
