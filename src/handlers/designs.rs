use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::entities::design::Model as DesignModel;
use crate::errors::ServiceError;
use crate::models::Operator;
use crate::services::designs::{
    CreateDesignRequest, DesignStats, UpdateDesignRequest,
};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_design).get(list_designs))
        .route("/stats", get(design_stats))
        .route(
            "/:id",
            get(get_design).put(update_design).delete(delete_design),
        )
        .route("/:id/complete", post(complete_design))
}

async fn create_design(
    State(state): State<AppState>,
    operator: Operator,
    Json(request): Json<CreateDesignRequest>,
) -> Result<Json<ApiResponse<DesignModel>>, ServiceError> {
    let design = state.services.designs.create_design(&operator, request).await?;
    Ok(Json(ApiResponse::success(design)))
}

async fn list_designs(
    State(state): State<AppState>,
    operator: Operator,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<DesignModel>>>, ServiceError> {
    let (designs, total) = state
        .services
        .designs
        .list_designs(&operator, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        designs,
        total,
        query.page,
        query.limit,
    ))))
}

async fn design_stats(
    State(state): State<AppState>,
    operator: Operator,
) -> Result<Json<ApiResponse<DesignStats>>, ServiceError> {
    let stats = state.services.designs.design_stats(&operator).await?;
    Ok(Json(ApiResponse::success(stats)))
}

async fn get_design(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DesignModel>>, ServiceError> {
    let design = state.services.designs.get_design(&operator, id).await?;
    Ok(Json(ApiResponse::success(design)))
}

async fn update_design(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateDesignRequest>,
) -> Result<Json<ApiResponse<DesignModel>>, ServiceError> {
    let design = state
        .services
        .designs
        .update_design(&operator, id, request)
        .await?;
    Ok(Json(ApiResponse::success(design)))
}

async fn complete_design(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DesignModel>>, ServiceError> {
    let design = state.services.designs.complete_design(&operator, id).await?;
    Ok(Json(ApiResponse::message(
        design,
        "Design completed and ready to order",
    )))
}

async fn delete_design(
    State(state): State<AppState>,
    operator: Operator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    state.services.designs.delete_design(&operator, id).await?;
    Ok(Json(ApiResponse::message((), "Design deleted")))
}
