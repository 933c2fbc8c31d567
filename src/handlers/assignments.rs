//! Tailor-side endpoints for assignments and production progress.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::tailor_assignment::Model as AssignmentModel;
use crate::errors::ServiceError;
use crate::models::Operator;
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/mine", get(list_my_assignments))
        .route("/order/:order_id", get(get_for_order))
        .route("/:id/accept", post(accept))
        .route("/:id/start", post(start))
        .route("/:id/progress", post(update_progress))
        .route("/:id/work-steps", post(add_work_step))
        .route("/:id/work-steps/:index/complete", post(complete_work_step))
        .route("/:id/quality-check", post(record_quality_check))
}

#[derive(Debug, Deserialize)]
struct ProgressRequest {
    completion_percentage: Decimal,
}

#[derive(Debug, Deserialize)]
struct WorkStepRequest {
    description: String,
}

#[derive(Debug, Deserialize)]
struct QualityCheckRequest {
    passed: bool,
    notes: Option<String>,
}

async fn list_my_assignments(
    State(state): State<AppState>,
    operator: Operator,
) -> Result<Json<ApiResponse<Vec<AssignmentModel>>>, ServiceError> {
    let assignments = state
        .services
        .assignments
        .list_for_tailor(operator.id)
        .await?;
    Ok(Json(ApiResponse::success(assignments)))
}

async fn get_for_order(
    State(state): State<AppState>,
    operator: Operator,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    state.services.orders.get_order(&operator, order_id).await?;
    let assignment = state
        .services
        .assignments
        .find_for_order(order_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Order {} has no tailor assignment yet", order_id))
        })?;
    Ok(Json(ApiResponse::success(assignment)))
}

async fn accept(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    let assignment = state.services.assignments.accept(&operator, id).await?;
    Ok(Json(ApiResponse::success(assignment)))
}

async fn start(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    let assignment = state.services.assignments.start(&operator, id).await?;
    Ok(Json(ApiResponse::success(assignment)))
}

async fn update_progress(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<ProgressRequest>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    let assignment = state
        .services
        .assignments
        .update_completion(&operator, id, request.completion_percentage)
        .await?;
    Ok(Json(ApiResponse::success(assignment)))
}

async fn add_work_step(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<WorkStepRequest>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    let assignment = state
        .services
        .assignments
        .add_work_step(&operator, id, request.description)
        .await?;
    Ok(Json(ApiResponse::success(assignment)))
}

async fn complete_work_step(
    State(state): State<AppState>,
    operator: Operator,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    let assignment = state
        .services
        .assignments
        .complete_work_step(&operator, id, index)
        .await?;
    Ok(Json(ApiResponse::success(assignment)))
}

async fn record_quality_check(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<QualityCheckRequest>,
) -> Result<Json<ApiResponse<AssignmentModel>>, ServiceError> {
    let assignment = state
        .services
        .assignments
        .record_quality_check(&operator, id, request.passed, request.notes)
        .await?;
    Ok(Json(ApiResponse::success(assignment)))
}
