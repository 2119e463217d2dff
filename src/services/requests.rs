//! Purchase request lifecycle: draft editing, submission into the approval
//! chain and the hand-off to purchase order generation on final approval.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        models::{
            Approval, ApprovalRecord, ItemType, PurchaseOrder, PurchaseRequest,
            PurchaseRequestItem, PurchaseRequestStatus,
        },
        numbering::DocumentKind,
        policy::{self, ChainStep},
    },
    infrastructure::{auth::AuthenticatedUser, db::PgPool, state::AppState},
    validation::rules::{self, ValidatedItem},
};

use super::{
    approvals::{self, fetch_approval_records},
    directory,
    errors::{Entity, ServiceError},
    numbering, orders,
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ItemInput {
    pub item_type: ItemType,
    #[validate(length(min = 1, max = 255))]
    pub item_name: String,
    pub quantity: Option<i32>,
    #[validate(length(max = 64))]
    pub unit: Option<String>,
    #[validate(range(min = 0))]
    pub price_per_unit: i64,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePurchaseRequest {
    #[validate(length(max = 255))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    pub items: Vec<ItemInput>,
}

/// Partial update of a draft. `items`, when present, replaces the whole list.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdatePurchaseRequest {
    #[validate(length(max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    pub items: Option<Vec<ItemInput>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequestDetail {
    #[serde(flatten)]
    pub request: PurchaseRequest,
    pub creator_name: String,
    pub department_name: String,
    pub items: Vec<PurchaseRequestItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedRequest {
    #[serde(flatten)]
    pub detail: PurchaseRequestDetail,
    pub approvals: Vec<ApprovalRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub request: PurchaseRequest,
    pub approval: Option<Approval>,
    pub purchase_order: Option<PurchaseOrder>,
}

/// Result of reaching the top of the chain.
#[derive(Debug)]
pub struct Finalization {
    pub status: PurchaseRequestStatus,
    pub purchase_order: Option<PurchaseOrder>,
}

pub struct RequestService {
    pub state: Arc<AppState>,
}

impl RequestService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Creates a draft in the creator's current department and allocates its
    /// number straight away.
    #[instrument(skip(self, actor, payload), fields(actor_id = %actor.user_id))]
    pub async fn create(
        &self,
        actor: &AuthenticatedUser,
        payload: CreatePurchaseRequest,
    ) -> Result<PurchaseRequestDetail, ServiceError> {
        payload.validate()?;
        let name = rules::validate_request_name(&payload.name)?;
        let description = rules::normalize_description(payload.description.as_deref());
        let items = rules::validate_items(&payload.items)?;

        let mut tx = self.state.pool.begin().await?;
        let creator = directory::require_actor(&mut tx, actor).await?;
        let pr_number =
            numbering::allocate(&mut tx, DocumentKind::PurchaseRequest, creator.department_id)
                .await?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO purchase_requests (id, pr_number, name, description, created_by, department_id, status, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(id)
        .bind(&pr_number)
        .bind(&name)
        .bind(&description)
        .bind(creator.id)
        .bind(creator.department_id)
        .bind(PurchaseRequestStatus::Draft)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        insert_items(&mut tx, id, &items).await?;
        tx.commit().await?;

        info!(pr_id = %id, %pr_number, items = items.len(), "purchase request drafted");
        self.get(id).await
    }

    #[instrument(skip(self, actor, payload), fields(actor_id = %actor.user_id))]
    pub async fn update(
        &self,
        actor: &AuthenticatedUser,
        pr_id: Uuid,
        payload: UpdatePurchaseRequest,
    ) -> Result<PurchaseRequestDetail, ServiceError> {
        payload.validate()?;
        let name = payload
            .name
            .as_deref()
            .map(rules::validate_request_name)
            .transpose()?;
        let items = payload
            .items
            .as_deref()
            .map(rules::validate_items)
            .transpose()?;
        let (replace_description, description) = match payload.description.as_deref() {
            Some(value) => (true, rules::normalize_description(Some(value))),
            None => (false, None),
        };

        let mut tx = self.state.pool.begin().await?;
        let pr = lock_request(&mut tx, pr_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseRequest))?;
        ensure_editable(&pr, actor)?;

        sqlx::query(
            "UPDATE purchase_requests
             SET name = COALESCE($1, name),
                 description = CASE WHEN $2 THEN $3 ELSE description END,
                 updated_at = $4
             WHERE id = $5",
        )
        .bind(&name)
        .bind(replace_description)
        .bind(&description)
        .bind(Utc::now())
        .bind(pr.id)
        .execute(&mut *tx)
        .await?;

        if let Some(items) = &items {
            sqlx::query("DELETE FROM purchase_request_items WHERE pr_id = $1")
                .bind(pr.id)
                .execute(&mut *tx)
                .await?;
            insert_items(&mut tx, pr.id, items).await?;
        }
        tx.commit().await?;

        info!(pr_id = %pr.id, replaced_items = items.is_some(), "purchase request draft updated");
        self.get(pr.id).await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn delete(&self, actor: &AuthenticatedUser, pr_id: Uuid) -> Result<(), ServiceError> {
        let mut tx = self.state.pool.begin().await?;
        let pr = lock_request(&mut tx, pr_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseRequest))?;
        ensure_editable(&pr, actor)?;

        sqlx::query("DELETE FROM purchase_requests WHERE id = $1")
            .bind(pr.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(pr_id = %pr.id, pr_number = %pr.pr_number, "purchase request draft deleted");
        Ok(())
    }

    /// Sends a draft into the approval chain.
    ///
    /// The first approver is resolved from the creator's role and department.
    /// A creator who is already the apex approver skips the chain: the request
    /// is finally approved on the spot and no approval row is written.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn submit(
        &self,
        actor: &AuthenticatedUser,
        pr_id: Uuid,
    ) -> Result<SubmitOutcome, ServiceError> {
        let anchors = self.state.anchors;
        let mut tx = self.state.pool.begin().await?;
        let pr = lock_request(&mut tx, pr_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseRequest))?;
        if pr.created_by != actor.user_id {
            return Err(ServiceError::NotOwner);
        }
        if pr.status != PurchaseRequestStatus::Draft {
            return Err(ServiceError::NotInDraft);
        }
        let creator = directory::require_user(&mut tx, pr.created_by).await?;

        let outcome = match policy::next_step(creator.role, creator.department_id, &anchors) {
            ChainStep::Next(target) => {
                let approver = directory::find_approver(&mut tx, target).await?;
                let purged = approvals::purge_approvals(&mut tx, pr.id).await?;
                let approval =
                    approvals::open_approval(&mut tx, pr.id, approver.id, target.level()).await?;
                let request = set_status(&mut tx, pr.id, PurchaseRequestStatus::Submitted).await?;
                info!(
                    pr_id = %pr.id,
                    approver_id = %approver.id,
                    level = target.level(),
                    purged,
                    "purchase request submitted"
                );
                SubmitOutcome {
                    request,
                    approval: Some(approval),
                    purchase_order: None,
                }
            }
            ChainStep::Apex => {
                approvals::purge_approvals(&mut tx, pr.id).await?;
                let finalization = finalize(&mut tx, &pr).await?;
                let request = fetch_request(&mut tx, pr.id).await?;
                info!(pr_id = %pr.id, status = request.status.as_str(), "purchase request approved at submission by apex creator");
                SubmitOutcome {
                    request,
                    approval: None,
                    purchase_order: finalization.purchase_order,
                }
            }
            ChainStep::NotParticipant => {
                return Err(ServiceError::Forbidden(
                    "administrators cannot submit purchase requests",
                ));
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get(&self, pr_id: Uuid) -> Result<PurchaseRequestDetail, ServiceError> {
        load_details(&self.state.pool, RequestScope::Ids(&[pr_id]))
            .await?
            .into_iter()
            .next()
            .ok_or(ServiceError::NotFound(Entity::PurchaseRequest))
    }

    /// The caller's own requests, newest first.
    pub async fn list_mine(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<PurchaseRequestDetail>, ServiceError> {
        load_details(&self.state.pool, RequestScope::CreatedBy(actor.user_id)).await
    }

    /// Requests that have left the draft/submitted stages, each with its
    /// approval trail.
    pub async fn list_processed(&self) -> Result<Vec<ProcessedRequest>, ServiceError> {
        let details = load_details(&self.state.pool, RequestScope::Processed).await?;
        let ids: Vec<Uuid> = details.iter().map(|detail| detail.request.id).collect();
        let mut trails: HashMap<Uuid, Vec<ApprovalRecord>> = HashMap::new();
        for (pr_id, record) in fetch_approval_records(&self.state.pool, &ids, true).await? {
            trails.entry(pr_id).or_default().push(record);
        }

        Ok(details
            .into_iter()
            .map(|detail| {
                let approvals = trails.remove(&detail.request.id).unwrap_or_default();
                ProcessedRequest { detail, approvals }
            })
            .collect())
    }

    /// Number the caller's department would receive next; not reserved.
    pub async fn preview_number(&self, actor: &AuthenticatedUser) -> Result<String, ServiceError> {
        let mut conn = self.state.pool.acquire().await?;
        let user = directory::require_actor(&mut conn, actor).await?;
        numbering::peek(&mut conn, DocumentKind::PurchaseRequest, user.department_id).await
    }
}

fn ensure_editable(pr: &PurchaseRequest, actor: &AuthenticatedUser) -> Result<(), ServiceError> {
    if pr.created_by != actor.user_id {
        return Err(ServiceError::NotOwner);
    }
    if pr.status != PurchaseRequestStatus::Draft {
        return Err(ServiceError::NotInDraft);
    }
    Ok(())
}

/// Final approval: service-only requests complete immediately, anything with
/// goods gets a purchase order and waits for fulfillment.
pub(crate) async fn finalize(
    tx: &mut Transaction<'_, Postgres>,
    pr: &PurchaseRequest,
) -> Result<Finalization, ServiceError> {
    set_status(tx, pr.id, PurchaseRequestStatus::FinalApproved).await?;
    let items = fetch_items(&mut **tx, pr.id).await?;

    if items.iter().all(|item| item.item_type == ItemType::Service) {
        set_status(tx, pr.id, PurchaseRequestStatus::Completed).await?;
        info!(pr_id = %pr.id, "service-only purchase request completed without purchase order");
        return Ok(Finalization {
            status: PurchaseRequestStatus::Completed,
            purchase_order: None,
        });
    }

    let order = orders::generate(tx, pr).await?;
    Ok(Finalization {
        status: PurchaseRequestStatus::FinalApproved,
        purchase_order: Some(order),
    })
}

pub(crate) async fn lock_request(
    tx: &mut Transaction<'_, Postgres>,
    pr_id: Uuid,
) -> Result<Option<PurchaseRequest>, ServiceError> {
    let pr = sqlx::query_as::<_, PurchaseRequest>(
        "SELECT * FROM purchase_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(pr_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(pr)
}

pub(crate) async fn fetch_request(
    conn: &mut PgConnection,
    pr_id: Uuid,
) -> Result<PurchaseRequest, ServiceError> {
    sqlx::query_as::<_, PurchaseRequest>("SELECT * FROM purchase_requests WHERE id = $1")
        .bind(pr_id)
        .fetch_optional(conn)
        .await?
        .ok_or(ServiceError::NotFound(Entity::PurchaseRequest))
}

pub(crate) async fn fetch_items(
    conn: &mut PgConnection,
    pr_id: Uuid,
) -> Result<Vec<PurchaseRequestItem>, ServiceError> {
    let items = sqlx::query_as::<_, PurchaseRequestItem>(
        "SELECT * FROM purchase_request_items WHERE pr_id = $1 ORDER BY position ASC",
    )
    .bind(pr_id)
    .fetch_all(conn)
    .await?;
    Ok(items)
}

pub(crate) async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    pr_id: Uuid,
    status: PurchaseRequestStatus,
) -> Result<PurchaseRequest, ServiceError> {
    sqlx::query_as::<_, PurchaseRequest>(
        "UPDATE purchase_requests SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *",
    )
    .bind(status)
    .bind(Utc::now())
    .bind(pr_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(ServiceError::NotFound(Entity::PurchaseRequest))
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    pr_id: Uuid,
    items: &[ValidatedItem],
) -> Result<(), ServiceError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO purchase_request_items (id, pr_id, position, item_type, item_name, quantity, unit, price_per_unit, note)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(Uuid::new_v4())
        .bind(pr_id)
        .bind(position as i32)
        .bind(item.item_type)
        .bind(&item.item_name)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.price_per_unit)
        .bind(&item.note)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub(crate) enum RequestScope<'a> {
    Ids(&'a [Uuid]),
    CreatedBy(Uuid),
    Processed,
}

#[derive(Debug, FromRow)]
struct RequestRow {
    #[sqlx(flatten)]
    request: PurchaseRequest,
    creator_name: String,
    department_name: String,
}

/// Loads requests with creator/department names and their items.
pub(crate) async fn load_details(
    pool: &PgPool,
    scope: RequestScope<'_>,
) -> Result<Vec<PurchaseRequestDetail>, ServiceError> {
    const SELECT: &str = r#"
        SELECT pr.id, pr.pr_number, pr.name, pr.description, pr.created_by, pr.department_id,
               pr.status, pr.created_at, pr.updated_at,
               u.name AS creator_name, d.name AS department_name
        FROM purchase_requests pr
        JOIN users u ON u.id = pr.created_by
        JOIN departments d ON d.id = pr.department_id
    "#;

    let rows: Vec<RequestRow> = match scope {
        RequestScope::Ids(ids) => {
            sqlx::query_as(&format!(
                "{SELECT} WHERE pr.id = ANY($1) ORDER BY pr.created_at DESC, pr.id ASC"
            ))
            .bind(ids)
            .fetch_all(pool)
            .await?
        }
        RequestScope::CreatedBy(user_id) => {
            sqlx::query_as(&format!(
                "{SELECT} WHERE pr.created_by = $1 ORDER BY pr.created_at DESC, pr.id ASC"
            ))
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
        RequestScope::Processed => {
            sqlx::query_as(&format!(
                "{SELECT} WHERE pr.status NOT IN ('draft', 'submitted') ORDER BY pr.created_at DESC, pr.id ASC"
            ))
            .fetch_all(pool)
            .await?
        }
    };

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|row| row.request.id).collect();
    let items: Vec<PurchaseRequestItem> = sqlx::query_as(
        "SELECT * FROM purchase_request_items WHERE pr_id = ANY($1) ORDER BY pr_id, position ASC",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut items_by_request: HashMap<Uuid, Vec<PurchaseRequestItem>> = HashMap::new();
    for item in items {
        items_by_request.entry(item.pr_id).or_default().push(item);
    }

    Ok(rows
        .into_iter()
        .map(|row| PurchaseRequestDetail {
            items: items_by_request
                .remove(&row.request.id)
                .unwrap_or_default(),
            request: row.request,
            creator_name: row.creator_name,
            department_name: row.department_name,
        })
        .collect())
}
