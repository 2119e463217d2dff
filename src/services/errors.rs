use std::fmt;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    models::{DepartmentId, PurchaseOrderStatus, Role},
    numbering::NumberingError,
};

const PENDING_APPROVAL_INDEX: &str = "approvals_one_pending_per_pr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    PurchaseRequest,
    PurchaseOrder,
    PurchaseOrderItem,
    User,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::PurchaseRequest => "purchase request",
            Entity::PurchaseOrder => "purchase order",
            Entity::PurchaseOrderItem => "purchase order item",
            Entity::User => "user",
        })
    }
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    ResolutionFailure,
    Internal,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("only the creator may modify this purchase request")]
    NotOwner,
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("approvers other than the finance head may not approve their own purchase request")]
    SelfApprovalForbidden,
    #[error("purchase request is not in draft")]
    NotInDraft,
    #[error("purchase request already has a pending approval")]
    ConflictingPendingApproval,
    #[error("no pending approval for this approver; not authorized or already decided")]
    NotAuthorizedOrAlreadyDecided,
    #[error("purchase order still has items that are not bought")]
    ItemsOutstanding,
    #[error("purchase order is not completed")]
    NotCompleted,
    #[error("purchase order cannot make this transition from status {0}")]
    InvalidOrderState(PurchaseOrderStatus),
    #[error("target user is not a staff member of the purchasing department")]
    StaffNotFound,
    #[error("no {role} found in department {department_id}")]
    ApproverNotFound {
        role: Role,
        department_id: DepartmentId,
    },
    #[error("anchor department {0:?} is not configured")]
    AnchorMissing(String),
    #[error("document numbering failed: {0}")]
    Numbering(#[from] NumberingError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) | ServiceError::StaffNotFound => ErrorKind::NotFound,
            ServiceError::NotOwner
            | ServiceError::Forbidden(_)
            | ServiceError::SelfApprovalForbidden => ErrorKind::Forbidden,
            ServiceError::NotInDraft
            | ServiceError::ConflictingPendingApproval
            | ServiceError::NotAuthorizedOrAlreadyDecided
            | ServiceError::ItemsOutstanding
            | ServiceError::NotCompleted
            | ServiceError::InvalidOrderState(_) => ErrorKind::Conflict,
            ServiceError::ApproverNotFound { .. } | ServiceError::AnchorMissing(_) => {
                ErrorKind::ResolutionFailure
            }
            ServiceError::Numbering(NumberingError::Exhausted { .. }) => ErrorKind::Conflict,
            ServiceError::Numbering(NumberingError::Malformed(_)) | ServiceError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ResolutionFailure | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NotOwner => "not_owner",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::SelfApprovalForbidden => "self_approval_forbidden",
            ServiceError::NotInDraft => "not_in_draft",
            ServiceError::ConflictingPendingApproval => "conflicting_pending_approval",
            ServiceError::NotAuthorizedOrAlreadyDecided => "not_authorized_or_already_decided",
            ServiceError::ItemsOutstanding => "items_outstanding",
            ServiceError::NotCompleted => "not_completed",
            ServiceError::InvalidOrderState(_) => "invalid_order_state",
            ServiceError::StaffNotFound => "staff_not_found",
            ServiceError::ApproverNotFound { .. } => "approver_not_found",
            ServiceError::AnchorMissing(_) => "anchor_department_missing",
            ServiceError::Numbering(NumberingError::Exhausted { .. }) => "sequence_exhausted",
            ServiceError::Numbering(NumberingError::Malformed(_)) => "malformed_document_number",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() && db_err.constraint() == Some(PENDING_APPROVAL_INDEX)
            {
                return ServiceError::ConflictingPendingApproval;
            }
        }
        ServiceError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}
