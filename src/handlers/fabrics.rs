//! Seller- and tailor-side endpoints for fabric sub-orders.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::order_fabric::Model as OrderFabricModel;
use crate::errors::ServiceError;
use crate::models::Operator;
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/mine", get(list_my_fabric_orders))
        .route("/order/:order_id", get(list_for_order))
        .route("/:id/confirm", post(confirm))
        .route("/:id/cutting", post(start_cutting))
        .route("/:id/ship", post(ship))
        .route("/:id/deliver", post(deliver))
        .route("/:id/quality", post(record_quality))
}

#[derive(Debug, Deserialize)]
struct ShipFabricRequest {
    tracking_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FabricQualityRequest {
    approved: bool,
    notes: Option<String>,
}

async fn list_my_fabric_orders(
    State(state): State<AppState>,
    operator: Operator,
) -> Result<Json<ApiResponse<Vec<OrderFabricModel>>>, ServiceError> {
    let rows = state
        .services
        .fulfillment
        .list_for_seller(operator.id)
        .await?;
    Ok(Json(ApiResponse::success(rows)))
}

async fn list_for_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<OrderFabricModel>>>, ServiceError> {
    // Visibility piggybacks on order access.
    state.services.orders.get_order(&operator, order_id).await?;
    let rows = state.services.fulfillment.list_for_order(order_id).await?;
    Ok(Json(ApiResponse::success(rows)))
}

async fn confirm(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderFabricModel>>, ServiceError> {
    let row = state.services.fulfillment.mark_ordered(&operator, id).await?;
    Ok(Json(ApiResponse::message(row, "Fabric order confirmed")))
}

async fn start_cutting(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderFabricModel>>, ServiceError> {
    let row = state.services.fulfillment.mark_cutting(&operator, id).await?;
    Ok(Json(ApiResponse::success(row)))
}

async fn ship(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<ShipFabricRequest>,
) -> Result<Json<ApiResponse<OrderFabricModel>>, ServiceError> {
    let row = state
        .services
        .fulfillment
        .mark_shipped(&operator, id, request.tracking_number)
        .await?;
    Ok(Json(ApiResponse::success(row)))
}

async fn deliver(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderFabricModel>>, ServiceError> {
    let row = state
        .services
        .fulfillment
        .mark_delivered(&operator, id)
        .await?;
    Ok(Json(ApiResponse::message(row, "Fabric delivered to tailor")))
}

async fn record_quality(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<FabricQualityRequest>,
) -> Result<Json<ApiResponse<OrderFabricModel>>, ServiceError> {
    let row = state
        .services
        .fulfillment
        .record_fabric_quality(&operator, id, request.approved, request.notes)
        .await?;
    Ok(Json(ApiResponse::success(row)))
}
