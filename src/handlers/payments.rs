use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::models::Operator;
use crate::services::payment_gateway::GatewayStatus;
use crate::services::payments::PaymentSession;
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/methods", get(payment_methods))
        .route("/history", get(payment_history))
        .route("/notifications", post(gateway_notification))
        .route("/orders/:id/initialize", post(initialize_payment))
        .route("/orders/:id/status", get(check_payment_status))
        .route("/orders/:id/refund", post(refund))
}

#[derive(Debug, Deserialize)]
struct RefundRequest {
    amount: Option<Decimal>,
    reason: Option<String>,
}

/// Static catalogue of payment methods offered at checkout.
async fn payment_methods() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(json!([
        { "code": "bank_transfer", "name": "Bank transfer" },
        { "code": "credit_card", "name": "Credit card" },
        { "code": "gopay", "name": "GoPay" },
        { "code": "shopeepay", "name": "ShopeePay" },
        { "code": "qris", "name": "QRIS" },
    ])))
}

async fn payment_history(
    State(state): State<AppState>,
    operator: Operator,
) -> Result<Json<ApiResponse<Vec<OrderModel>>>, ServiceError> {
    let orders = state.services.payments.payment_history(&operator).await?;
    Ok(Json(ApiResponse::success(orders)))
}

async fn initialize_payment(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentSession>>, ServiceError> {
    let session = state
        .services
        .payments
        .initialize_payment(&operator, id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

/// Webhook endpoint for the payment gateway. No operator context: the
/// payload is only trusted as far as its order id resolves, and processing
/// is idempotent.
async fn gateway_notification(
    State(state): State<AppState>,
    Json(status): Json<GatewayStatus>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let order = state.services.payments.process_notification(status).await?;
    Ok(Json(ApiResponse::success(json!({
        "order_id": order.id,
        "status": order.status,
        "payment_status": order.payment_status,
    }))))
}

async fn check_payment_status(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .payments
        .check_payment_status(&operator, id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn refund(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let reason = request.reason.as_deref().unwrap_or("Refund requested");
    let order = state
        .services
        .payments
        .refund(&operator, id, request.amount, reason)
        .await?;
    Ok(Json(ApiResponse::message(order, "Refund processed")))
}
