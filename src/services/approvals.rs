//! Approval ledger and chain progression.
//!
//! The ledger keeps at most one pending approval per purchase request. Every
//! write below runs inside a transaction that already holds the request row
//! lock taken by `requests::lock_request`.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Postgres, Row, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        models::{
            Approval, ApprovalRecord, ApprovalStatus, ApproverIdentity, Decision, PurchaseOrder,
            PurchaseRequest, PurchaseRequestStatus,
        },
        policy::{self, ChainStep},
    },
    infrastructure::{auth::AuthenticatedUser, db::PgPool, state::AppState},
    validation::rules,
};

use super::{
    directory,
    errors::{Entity, ServiceError},
    requests::{self, PurchaseRequestDetail, RequestScope},
};

#[derive(Debug, Deserialize, Validate)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[validate(length(max = 1000))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub approval: Approval,
    pub request: PurchaseRequest,
    pub next_approval: Option<Approval>,
    pub purchase_order: Option<PurchaseOrder>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    pub approval: Approval,
    pub request: PurchaseRequestDetail,
}

pub struct ApprovalService {
    pub state: Arc<AppState>,
}

impl ApprovalService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Records the caller's decision on the pending approval addressed to them
    /// and moves the request along the chain.
    ///
    /// Approving resolves the next approver from the decider's own role and
    /// department. When the decider is the apex the request is finalized in
    /// the same transaction, which may generate a purchase order. Rejecting
    /// ends the chain.
    ///
    /// A request that does not exist, an approval addressed to someone else and
    /// an approval already decided all surface as
    /// `NotAuthorizedOrAlreadyDecided`.
    #[instrument(skip(self, actor, payload), fields(actor_id = %actor.user_id, decision = ?payload.decision))]
    pub async fn decide(
        &self,
        actor: &AuthenticatedUser,
        pr_id: Uuid,
        payload: DecisionRequest,
    ) -> Result<DecisionOutcome, ServiceError> {
        payload.validate()?;
        let anchors = self.state.anchors;
        let comment = rules::normalize_description(payload.comment.as_deref());

        let mut tx = self.state.pool.begin().await?;
        let Some(pr) = requests::lock_request(&mut tx, pr_id).await? else {
            return Err(ServiceError::NotAuthorizedOrAlreadyDecided);
        };
        if pr.status.is_terminal() {
            return Err(ServiceError::NotAuthorizedOrAlreadyDecided);
        }
        let approver = directory::require_actor(&mut tx, actor).await?;

        if payload.decision == Decision::Approve
            && policy::self_approval_forbidden(
                approver.id,
                approver.role,
                approver.department_id,
                pr.created_by,
                &anchors,
            )
        {
            warn!(pr_id = %pr.id, approver_id = %approver.id, "self approval refused");
            return Err(ServiceError::SelfApprovalForbidden);
        }

        let approval = decide_pending(&mut tx, pr.id, approver.id, payload.decision, comment)
            .await?
            .ok_or(ServiceError::NotAuthorizedOrAlreadyDecided)?;

        let outcome = match payload.decision {
            Decision::Reject => {
                let request =
                    requests::set_status(&mut tx, pr.id, PurchaseRequestStatus::Rejected).await?;
                info!(
                    pr_id = %pr.id,
                    approver_id = %approver.id,
                    approval = approval.status.as_str(),
                    "purchase request rejected"
                );
                DecisionOutcome {
                    approval,
                    request,
                    next_approval: None,
                    purchase_order: None,
                }
            }
            Decision::Approve => {
                match policy::next_step(approver.role, approver.department_id, &anchors) {
                    ChainStep::Next(target) => {
                        let next = directory::find_approver(&mut tx, target).await?;
                        let next_approval =
                            open_approval(&mut tx, pr.id, next.id, target.level()).await?;
                        let request = requests::fetch_request(&mut tx, pr.id).await?;
                        info!(
                            pr_id = %pr.id,
                            approver_id = %approver.id,
                            next_approver_id = %next.id,
                            approval = approval.status.as_str(),
                            level = target.level(),
                            "approval recorded, escalated"
                        );
                        DecisionOutcome {
                            approval,
                            request,
                            next_approval: Some(next_approval),
                            purchase_order: None,
                        }
                    }
                    ChainStep::Apex => {
                        let finalization = requests::finalize(&mut tx, &pr).await?;
                        let request = requests::fetch_request(&mut tx, pr.id).await?;
                        info!(
                            pr_id = %pr.id,
                            approver_id = %approver.id,
                            status = finalization.status.as_str(),
                            "purchase request finally approved"
                        );
                        DecisionOutcome {
                            approval,
                            request,
                            next_approval: None,
                            purchase_order: finalization.purchase_order,
                        }
                    }
                    ChainStep::NotParticipant => {
                        return Err(ServiceError::Forbidden(
                            "administrators do not take part in approval chains",
                        ));
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Approval trail joined with approver identity, decided entries first in
    /// decision order. Pending entries are appended when `include_pending`.
    pub async fn history(
        &self,
        pr_id: Uuid,
        include_pending: bool,
    ) -> Result<Vec<ApprovalRecord>, ServiceError> {
        let pool = &self.state.pool;
        let ids = [pr_id];
        let ((), records) = futures::try_join!(
            ensure_request_exists(pool, pr_id),
            fetch_approval_records(pool, &ids, include_pending),
        )?;
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Raw approval rows in creation order.
    pub async fn status(&self, pr_id: Uuid) -> Result<Vec<Approval>, ServiceError> {
        ensure_request_exists(&self.state.pool, pr_id).await?;
        let approvals = sqlx::query_as::<_, Approval>(
            "SELECT * FROM approvals WHERE pr_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(pr_id)
        .fetch_all(&self.state.pool)
        .await?;
        Ok(approvals)
    }

    /// Pending approvals addressed to the caller, oldest first.
    pub async fn inbox(&self, actor: &AuthenticatedUser) -> Result<Vec<InboxEntry>, ServiceError> {
        let pending = sqlx::query_as::<_, Approval>(
            "SELECT * FROM approvals
             WHERE approver_id = $1 AND status = $2
             ORDER BY created_at ASC, id ASC",
        )
        .bind(actor.user_id)
        .bind(ApprovalStatus::Pending)
        .fetch_all(&self.state.pool)
        .await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = pending.iter().map(|approval| approval.pr_id).collect();
        let mut details: HashMap<Uuid, PurchaseRequestDetail> =
            requests::load_details(&self.state.pool, RequestScope::Ids(&ids))
                .await?
                .into_iter()
                .map(|detail| (detail.request.id, detail))
                .collect();

        Ok(pending
            .into_iter()
            .filter_map(|approval| {
                details
                    .remove(&approval.pr_id)
                    .map(|request| InboxEntry { approval, request })
            })
            .collect())
    }
}

/// Opens a pending approval. The partial unique index on pending approvals
/// backs the explicit check below.
pub(crate) async fn open_approval(
    tx: &mut Transaction<'_, Postgres>,
    pr_id: Uuid,
    approver_id: Uuid,
    level: &str,
) -> Result<Approval, ServiceError> {
    let pending_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM approvals WHERE pr_id = $1 AND status = $2)",
    )
    .bind(pr_id)
    .bind(ApprovalStatus::Pending)
    .fetch_one(&mut **tx)
    .await?;
    if pending_exists {
        return Err(ServiceError::ConflictingPendingApproval);
    }

    let approval = sqlx::query_as::<_, Approval>(
        "INSERT INTO approvals (id, pr_id, approver_id, level, status, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(pr_id)
    .bind(approver_id)
    .bind(level)
    .bind(ApprovalStatus::Pending)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;
    Ok(approval)
}

/// Removes every approval row of a request; used when it is (re)submitted.
pub(crate) async fn purge_approvals(
    tx: &mut Transaction<'_, Postgres>,
    pr_id: Uuid,
) -> Result<u64, ServiceError> {
    let result = sqlx::query("DELETE FROM approvals WHERE pr_id = $1")
        .bind(pr_id)
        .execute(tx.as_mut())
        .await?;
    Ok(result.rows_affected())
}

/// Moves the pending approval for (`pr_id`, `approver_id`) out of pending.
/// Returns `None` when there is no such pending row.
pub(crate) async fn decide_pending(
    tx: &mut Transaction<'_, Postgres>,
    pr_id: Uuid,
    approver_id: Uuid,
    decision: Decision,
    comment: Option<String>,
) -> Result<Option<Approval>, ServiceError> {
    let approval = sqlx::query_as::<_, Approval>(
        "UPDATE approvals
         SET status = $1, comment = $2, approved_at = $3
         WHERE pr_id = $4 AND approver_id = $5 AND status = $6
         RETURNING *",
    )
    .bind(decision.resulting_status())
    .bind(comment)
    .bind(Utc::now())
    .bind(pr_id)
    .bind(approver_id)
    .bind(ApprovalStatus::Pending)
    .fetch_optional(tx.as_mut())
    .await?;
    Ok(approval)
}

/// Approval records for `pr_ids`, keyed by request id, ordered by decision
/// time with pending rows last.
pub(crate) async fn fetch_approval_records(
    pool: &PgPool,
    pr_ids: &[Uuid],
    include_pending: bool,
) -> Result<Vec<(Uuid, ApprovalRecord)>, ServiceError> {
    if pr_ids.is_empty() {
        return Ok(Vec::new());
    }
    let records = sqlx::query(
        r#"
        SELECT a.id, a.pr_id, a.level, a.status, a.comment, a.approved_at,
               u.id AS approver_id, u.name AS approver_name, u.role AS approver_role,
               u.email AS approver_email
        FROM approvals a
        JOIN users u ON u.id = a.approver_id
        WHERE a.pr_id = ANY($1) AND ($2 OR a.status <> 'pending')
        ORDER BY a.pr_id, a.approved_at ASC NULLS LAST, a.created_at ASC, a.id ASC
        "#,
    )
    .bind(pr_ids)
    .bind(include_pending)
    .try_map(|row: PgRow| map_record(&row))
    .fetch_all(pool)
    .await?;
    Ok(records)
}

fn map_record(row: &PgRow) -> Result<(Uuid, ApprovalRecord), sqlx::Error> {
    Ok((
        row.try_get("pr_id")?,
        ApprovalRecord {
            id: row.try_get("id")?,
            level: row.try_get("level")?,
            status: row.try_get("status")?,
            comment: row.try_get("comment")?,
            approved_at: row.try_get("approved_at")?,
            approver: ApproverIdentity {
                id: row.try_get("approver_id")?,
                name: row.try_get("approver_name")?,
                role: row.try_get("approver_role")?,
                email: row.try_get("approver_email")?,
            },
        },
    ))
}

async fn ensure_request_exists(pool: &PgPool, pr_id: Uuid) -> Result<(), ServiceError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM purchase_requests WHERE id = $1)")
            .bind(pr_id)
            .fetch_one(pool)
            .await?;
    if exists {
        Ok(())
    } else {
        Err(ServiceError::NotFound(Entity::PurchaseRequest))
    }
}
