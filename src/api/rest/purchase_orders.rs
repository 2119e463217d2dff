use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    api::rest::{to_response, ApiError},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::orders::{AssignRequest, OrderService},
};

pub fn router() -> Router {
    Router::new()
        .route("/open", get(list_open))
        .route("/assigned", get(list_assigned))
        .route("/completed", get(list_completed))
        .route("/closed", get(list_closed))
        .route("/items/:item_id/check", post(check_item))
        .route("/:id/assign", post(assign))
        .route("/:id/items", get(items))
        .route("/:id/complete", post(complete))
        .route("/:id/close", post(close))
        .route("/:id/approve", post(close))
}

async fn list_open(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orders = OrderService::new(state)
        .list_open(&user)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrders": orders })))
}

async fn list_assigned(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orders = OrderService::new(state)
        .list_assigned(&user)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrders": orders })))
}

async fn list_completed(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orders = OrderService::new(state)
        .list_completed(&user)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrders": orders })))
}

async fn list_closed(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orders = OrderService::new(state)
        .list_closed(&user)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrders": orders })))
}

async fn assign(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = OrderService::new(state)
        .assign(&user, id, payload.staff_id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrder": order })))
}

async fn items(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let items = OrderService::new(state)
        .items(id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "items": items })))
}

async fn check_item(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = OrderService::new(state)
        .check_item(&user, item_id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "check": outcome })))
}

async fn complete(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = OrderService::new(state)
        .complete(&user, id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrder": order })))
}

async fn close(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let order = OrderService::new(state)
        .close(&user, id)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseOrder": order })))
}
