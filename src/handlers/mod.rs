//! HTTP surface. Identity arrives from the gateway in front of this service
//! as `x-operator-id` / `x-operator-role` headers; the [`Operator`] extractor
//! turns them into the explicit context every service call takes.

pub mod assignments;
pub mod designs;
pub mod fabrics;
pub mod orders;
pub mod payments;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Router;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Operator, OperatorRole};
use crate::AppState;

const OPERATOR_ID_HEADER: &str = "x-operator-id";
const OPERATOR_ROLE_HEADER: &str = "x-operator-role";

#[async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(OPERATOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("Missing operator identity".to_string()))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| ServiceError::Unauthorized("Malformed operator id".to_string()))?;

        let role = parts
            .headers
            .get(OPERATOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("Missing operator role".to_string()))?;
        let role: OperatorRole = role
            .parse()
            .map_err(|_| ServiceError::Unauthorized("Unknown operator role".to_string()))?;

        Ok(Operator { id, role })
    }
}

/// All versioned API routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/designs", designs::routes())
        .nest("/orders", orders::routes())
        .nest("/payments", payments::routes())
        .nest("/fabric-orders", fabrics::routes())
        .nest("/assignments", assignments::routes())
}
