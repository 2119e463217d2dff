use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::rest::{to_response, ApiError},
    domain::models::Decision,
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{
        approvals::{ApprovalService, DecisionRequest},
        errors::ServiceError,
    },
};

pub fn router() -> Router {
    Router::new()
        .route("/inbox", get(inbox))
        .route("/:pr_id/approve", post(approve))
        .route("/:pr_id/reject", post(reject))
        .route("/:pr_id/history", get(history))
        .route("/:pr_id/status", get(status))
}

#[derive(Debug, Default, Deserialize)]
struct CommentBody {
    comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    #[serde(default)]
    include_pending: bool,
}

async fn inbox(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = ApprovalService::new(state);
    let entries = service.inbox(&user).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "approvals": entries })))
}

async fn approve(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(pr_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    decide(state, user, pr_id, Decision::Approve, body).await
}

async fn reject(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(pr_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    decide(state, user, pr_id, Decision::Reject, body).await
}

async fn decide(
    state: Arc<AppState>,
    user: AuthenticatedUser,
    pr_id: Uuid,
    decision: Decision,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let comment = parse_comment(&body).map_err(to_response)?;
    let service = ApprovalService::new(state);
    let outcome = service
        .decide(&user, pr_id, DecisionRequest { decision, comment })
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "decision": outcome })))
}

/// The decision body is optional. An empty body means no comment, anything
/// else must be a well-formed `{"comment": ...}` object.
fn parse_comment(body: &[u8]) -> Result<Option<String>, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Json::<CommentBody>::from_bytes(body)
        .map(|Json(body)| body.comment)
        .map_err(|rejection| ServiceError::Validation(rejection.body_text()))
}

async fn history(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(pr_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = ApprovalService::new(state);
    let records = service
        .history(pr_id, query.include_pending)
        .await
        .map_err(to_response)?;
    Ok(Json(serde_json::json!({ "history": records })))
}

async fn status(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(pr_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = ApprovalService::new(state);
    let approvals = service.status(pr_id).await.map_err(to_response)?;
    Ok(Json(serde_json::json!({ "approvals": approvals })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_carries_no_comment() {
        assert_eq!(parse_comment(b"").ok(), Some(None));
        assert_eq!(parse_comment(b"  \n").ok(), Some(None));
    }

    #[test]
    fn comment_is_read_from_object() {
        let comment = parse_comment(br#"{"comment":"over budget"}"#).ok().flatten();
        assert_eq!(comment.as_deref(), Some("over budget"));
        assert_eq!(parse_comment(b"{}").ok(), Some(None));
    }

    #[test]
    fn malformed_body_is_a_validation_error() {
        let bodies: [&[u8]; 3] = [br#"{"comment": "over budget",}"#, b"not json", br#"{"comment": 5}"#];
        for body in bodies {
            assert!(matches!(parse_comment(body), Err(ServiceError::Validation(_))));
        }
    }
}
