use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    api::rest::{to_response, ApiError},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::requests::{CreatePurchaseRequest, RequestService, UpdatePurchaseRequest},
};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_request).get(list_mine))
        .route("/number-preview", get(preview_number))
        .route("/processed", get(list_processed))
        .route(
            "/:id",
            get(get_request).put(update_request).delete(delete_request),
        )
        .route("/:id/submit", post(submit_request))
}

async fn create_request(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreatePurchaseRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let service = RequestService::new(state);
    let request = service.create(&user, payload).await.map_err(to_response)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "purchaseRequest": request })),
    ))
}

async fn list_mine(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = RequestService::new(state);
    let requests = service.list_mine(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseRequests": requests })))
}

async fn list_processed(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = RequestService::new(state);
    let requests = service.list_processed().await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseRequests": requests })))
}

async fn preview_number(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = RequestService::new(state);
    let number = service.preview_number(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "prNumber": number })))
}

async fn get_request(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = RequestService::new(state);
    let request = service.get(id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseRequest": request })))
}

async fn update_request(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePurchaseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = RequestService::new(state);
    let request = service
        .update(&user, id, payload)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "purchaseRequest": request })))
}

async fn delete_request(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let service = RequestService::new(state);
    service.delete(&user, id).await.map_err(to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_request(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = RequestService::new(state);
    let outcome = service.submit(&user, id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "submission": outcome })))
}
