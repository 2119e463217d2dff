use axum::{http::StatusCode, routing::get, Json, Router};

use crate::{
    api::rest::{
        approvals::router as approvals_router, directory::router as directory_router,
        purchase_orders::router as purchase_orders_router,
        purchase_requests::router as purchase_requests_router,
    },
    services::errors::ServiceError,
};

pub mod approvals;
pub mod directory;
pub mod health;
pub mod purchase_orders;
pub mod purchase_requests;

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .nest("/purchase-requests", purchase_requests_router())
        .nest("/approvals", approvals_router())
        .nest("/purchase-orders", purchase_orders_router())
        .nest("/directory", directory_router())
}

/// Error body carries the message plus the stable `code` and coarse `kind`,
/// so clients can tell a setup problem from a rejected action.
pub(crate) fn to_response(err: ServiceError) -> ApiError {
    (
        err.status_code(),
        Json(serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
            "kind": err.kind(),
        })),
    )
}
