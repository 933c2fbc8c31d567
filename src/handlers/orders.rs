use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::models::{Operator, OrderStatus};
use crate::services::orders::{CreateOrderRequest, OrderStats, UpdateOrderRequest};
use crate::services::tracking::{OrderTracking, TimelineEvent};
use crate::{ApiResponse, AppState, PaginatedResponse};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/stats", get(order_stats))
        .route("/number/:order_number", get(get_order_by_number))
        .route("/:id", get(get_order).put(update_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/ship", post(ship_order))
        .route("/:id/confirm-delivery", post(confirm_delivery))
        .route("/:id/complete", post(complete_order))
        .route("/:id/tracking", get(track_order))
        .route("/:id/timeline", get(order_timeline))
}

#[derive(Debug, Deserialize)]
struct OrderListQuery {
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_limit")]
    limit: u64,
    status: Option<OrderStatus>,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
struct CancelOrderRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShipOrderRequest {
    tracking_number: String,
}

async fn create_order(
    State(state): State<AppState>,
    operator: Operator,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .orders
        .create_order(&operator, request, state.config.shipping_cost)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn list_orders(
    State(state): State<AppState>,
    operator: Operator,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderModel>>>, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(&operator, query.status, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders,
        total,
        query.page,
        query.limit,
    ))))
}

async fn order_stats(
    State(state): State<AppState>,
    operator: Operator,
) -> Result<Json<ApiResponse<OrderStats>>, ServiceError> {
    let stats = state.services.orders.order_stats(&operator).await?;
    Ok(Json(ApiResponse::success(stats)))
}

async fn get_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state.services.orders.get_order(&operator, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn get_order_by_number(
    State(state): State<AppState>,
    operator: Operator,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_by_number(&operator, &order_number)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn update_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_order(&operator, id, request)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn cancel_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let reason = request.reason.as_deref().unwrap_or("Cancelled by customer");
    let order = state
        .services
        .orders
        .cancel_order(&operator, id, reason)
        .await?;
    Ok(Json(ApiResponse::message(order, "Order cancelled")))
}

async fn ship_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<ShipOrderRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .orders
        .ship_order(&operator, id, request.tracking_number)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn confirm_delivery(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state.services.orders.confirm_delivery(&operator, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn complete_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state.services.orders.complete_order(&operator, id).await?;
    Ok(Json(ApiResponse::message(order, "Order completed")))
}

async fn track_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderTracking>>, ServiceError> {
    let tracking = state.services.tracking.track_order(&operator, id).await?;
    Ok(Json(ApiResponse::success(tracking)))
}

async fn order_timeline(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<TimelineEvent>>>, ServiceError> {
    let tracking = state.services.tracking.track_order(&operator, id).await?;
    Ok(Json(ApiResponse::success(tracking.timeline)))
}
