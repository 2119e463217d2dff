use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    routing::get,
    Json, Router,
};

use crate::{
    api::rest::{to_response, ApiError},
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::directory::{DirectoryService, UserFilter},
};

pub fn router() -> Router {
    Router::new().route("/users", get(list_users))
}

async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
    Query(filter): Query<UserFilter>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let users = DirectoryService::new(state)
        .list_users(filter)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "users": users })))
}
