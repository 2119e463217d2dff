//! Purchase order generation and fulfillment.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    domain::{
        models::{
            PurchaseOrder, PurchaseOrderItem, PurchaseOrderItemStatus, PurchaseOrderStatus,
            PurchaseRequest, PurchaseRequestStatus, Role, User,
        },
        numbering::DocumentKind,
        policy,
    },
    infrastructure::{auth::AuthenticatedUser, state::AppState},
};

use super::{
    directory,
    errors::{Entity, ServiceError},
    numbering, requests,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub staff_id: Uuid,
}

/// Result of ticking a checklist item. Ticking twice is not an error.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", content = "item", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckOutcome {
    Bought(PurchaseOrderItem),
    AlreadyBought(PurchaseOrderItem),
}

impl CheckOutcome {
    pub fn item(&self) -> &PurchaseOrderItem {
        match self {
            CheckOutcome::Bought(item) | CheckOutcome::AlreadyBought(item) => item,
        }
    }
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub order: PurchaseOrder,
    pub pr_number: String,
    pub request_name: String,
    pub department_name: String,
    pub requester_name: String,
    pub assignee_name: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub orders_scanned: usize,
    pub orders_repaired: usize,
    pub items_inserted: u64,
}

#[derive(Clone, Copy)]
enum OrderListing {
    Status(PurchaseOrderStatus),
    AssignedTo(Uuid),
}

pub struct OrderService {
    pub state: Arc<AppState>,
}

impl OrderService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Hands an open (or already assigned) order to a purchasing staff member.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn assign(
        &self,
        actor: &AuthenticatedUser,
        po_id: Uuid,
        staff_id: Uuid,
    ) -> Result<PurchaseOrder, ServiceError> {
        let mut tx = self.state.pool.begin().await?;
        let head = directory::require_actor(&mut tx, actor).await?;
        self.ensure_purchasing_head(&head)?;

        let staff = directory::find_user(&mut tx, staff_id).await?;
        let staff = match staff {
            Some(user)
                if policy::is_purchasing_staff(user.role, user.department_id, &self.state.anchors) =>
            {
                user
            }
            _ => return Err(ServiceError::StaffNotFound),
        };
        let po = lock_order(&mut tx, po_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseOrder))?;
        if !po.status.is_assignable() {
            return Err(ServiceError::InvalidOrderState(po.status));
        }

        let updated = sqlx::query_as::<_, PurchaseOrder>(
            "UPDATE purchase_orders SET assigned_to = $1, status = $2, updated_at = $3
             WHERE id = $4 RETURNING *",
        )
        .bind(staff.id)
        .bind(PurchaseOrderStatus::Assigned)
        .bind(Utc::now())
        .bind(po.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(po_id = %po.id, staff_id = %staff.id, previous = %po.status, "purchase order assigned");
        Ok(updated)
    }

    /// Marks one checklist item bought.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn check_item(
        &self,
        actor: &AuthenticatedUser,
        item_id: Uuid,
    ) -> Result<CheckOutcome, ServiceError> {
        let mut tx = self.state.pool.begin().await?;
        let po_id: Uuid =
            sqlx::query_scalar("SELECT po_id FROM purchase_order_items WHERE id = $1")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(ServiceError::NotFound(Entity::PurchaseOrderItem))?;

        // Order row first, then the item: same lock order as `complete`.
        lock_order(&mut tx, po_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseOrder))?;
        let item = sqlx::query_as::<_, PurchaseOrderItem>(
            "SELECT * FROM purchase_order_items WHERE id = $1 FOR UPDATE",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound(Entity::PurchaseOrderItem))?;

        if item.status == PurchaseOrderItemStatus::Bought {
            tx.commit().await?;
            return Ok(CheckOutcome::AlreadyBought(item));
        }

        let item = sqlx::query_as::<_, PurchaseOrderItem>(
            "UPDATE purchase_order_items SET status = $1 WHERE id = $2 RETURNING *",
        )
        .bind(PurchaseOrderItemStatus::Bought)
        .bind(item.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(po_id = %po_id, item_id = %item.id, "purchase order item bought");
        Ok(CheckOutcome::Bought(item))
    }

    /// Completes the order once every item is bought, completing the source
    /// request with it.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn complete(
        &self,
        actor: &AuthenticatedUser,
        po_id: Uuid,
    ) -> Result<PurchaseOrder, ServiceError> {
        let mut tx = self.state.pool.begin().await?;
        let po = lock_order(&mut tx, po_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseOrder))?;
        if !po.status.is_completable() {
            return Err(ServiceError::InvalidOrderState(po.status));
        }

        ensure_items(&mut tx, &po).await?;
        let outstanding: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM purchase_order_items WHERE po_id = $1 AND status <> $2",
        )
        .bind(po.id)
        .bind(PurchaseOrderItemStatus::Bought)
        .fetch_one(&mut *tx)
        .await?;
        if outstanding > 0 {
            warn!(po_id = %po.id, outstanding, "purchase order has unbought items");
            return Err(ServiceError::ItemsOutstanding);
        }

        let updated = set_order_status(&mut tx, po.id, PurchaseOrderStatus::Completed).await?;
        requests::set_status(&mut tx, po.pr_id, PurchaseRequestStatus::Completed).await?;
        tx.commit().await?;

        info!(po_id = %po.id, pr_id = %po.pr_id, "purchase order completed");
        Ok(updated)
    }

    /// Closes a completed order. Also reachable as "approve" on the order.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id))]
    pub async fn close(
        &self,
        actor: &AuthenticatedUser,
        po_id: Uuid,
    ) -> Result<PurchaseOrder, ServiceError> {
        let mut tx = self.state.pool.begin().await?;
        let head = directory::require_actor(&mut tx, actor).await?;
        self.ensure_purchasing_head(&head)?;

        let po = lock_order(&mut tx, po_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseOrder))?;
        if po.status != PurchaseOrderStatus::Completed {
            return Err(ServiceError::NotCompleted);
        }

        let updated = set_order_status(&mut tx, po.id, PurchaseOrderStatus::Closed).await?;
        let pr = requests::fetch_request(&mut tx, po.pr_id).await?;
        if pr.status != PurchaseRequestStatus::Completed {
            requests::set_status(&mut tx, pr.id, PurchaseRequestStatus::Completed).await?;
        }
        tx.commit().await?;

        info!(po_id = %po.id, pr_id = %po.pr_id, "purchase order closed");
        Ok(updated)
    }

    pub async fn list_open(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<PurchaseOrderSummary>, ServiceError> {
        self.require_purchasing_head(actor).await?;
        self.list(OrderListing::Status(PurchaseOrderStatus::Open))
            .await
    }

    pub async fn list_completed(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<PurchaseOrderSummary>, ServiceError> {
        self.require_purchasing_head(actor).await?;
        self.list(OrderListing::Status(PurchaseOrderStatus::Completed))
            .await
    }

    pub async fn list_closed(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<PurchaseOrderSummary>, ServiceError> {
        self.require_purchasing_head(actor).await?;
        self.list(OrderListing::Status(PurchaseOrderStatus::Closed))
            .await
    }

    /// Orders assigned to the calling staff member.
    pub async fn list_assigned(
        &self,
        actor: &AuthenticatedUser,
    ) -> Result<Vec<PurchaseOrderSummary>, ServiceError> {
        let mut conn = self.state.pool.acquire().await?;
        let user = directory::require_actor(&mut conn, actor).await?;
        drop(conn);
        if user.role != Role::Staff {
            return Err(ServiceError::Forbidden(
                "only staff members have assigned purchase orders",
            ));
        }
        self.list(OrderListing::AssignedTo(user.id)).await
    }

    /// Checklist items of an order, materializing them from the source request
    /// first if the order has none.
    pub async fn items(&self, po_id: Uuid) -> Result<Vec<PurchaseOrderItem>, ServiceError> {
        let mut tx = self.state.pool.begin().await?;
        let po = lock_order(&mut tx, po_id)
            .await?
            .ok_or(ServiceError::NotFound(Entity::PurchaseOrder))?;
        ensure_items(&mut tx, &po).await?;
        let items = sqlx::query_as::<_, PurchaseOrderItem>(
            "SELECT * FROM purchase_order_items WHERE po_id = $1 ORDER BY position ASC",
        )
        .bind(po.id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(items)
    }

    /// Walks every order and materializes missing items. Each order is repaired
    /// in its own transaction.
    #[instrument(skip(self))]
    pub async fn repair_all(&self) -> Result<RepairReport, ServiceError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM purchase_orders ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.state.pool)
                .await?;

        let mut report = RepairReport::default();
        for po_id in ids {
            let mut tx = self.state.pool.begin().await?;
            let Some(po) = lock_order(&mut tx, po_id).await? else {
                continue;
            };
            let inserted = ensure_items(&mut tx, &po).await?;
            tx.commit().await?;

            report.orders_scanned += 1;
            if inserted > 0 {
                report.orders_repaired += 1;
                report.items_inserted += inserted;
            }
            info!(po_id = %po.id, po_number = %po.po_number, inserted, "checked purchase order items");
        }
        Ok(report)
    }

    async fn list(&self, listing: OrderListing) -> Result<Vec<PurchaseOrderSummary>, ServiceError> {
        const SELECT: &str = r#"
            SELECT po.id, po.po_number, po.pr_id, po.assigned_to, po.status, po.note,
                   po.created_at, po.updated_at,
                   pr.pr_number, pr.name AS request_name,
                   d.name AS department_name,
                   requester.name AS requester_name,
                   assignee.name AS assignee_name
            FROM purchase_orders po
            JOIN purchase_requests pr ON pr.id = po.pr_id
            JOIN departments d ON d.id = pr.department_id
            JOIN users requester ON requester.id = pr.created_by
            LEFT JOIN users assignee ON assignee.id = po.assigned_to
        "#;

        let orders = match listing {
            OrderListing::Status(status) => {
                sqlx::query_as::<_, PurchaseOrderSummary>(&format!(
                    "{SELECT} WHERE po.status = $1 ORDER BY po.created_at DESC, po.id ASC"
                ))
                .bind(status)
                .fetch_all(&self.state.pool)
                .await?
            }
            OrderListing::AssignedTo(user_id) => {
                sqlx::query_as::<_, PurchaseOrderSummary>(&format!(
                    "{SELECT} WHERE po.assigned_to = $1 ORDER BY po.created_at DESC, po.id ASC"
                ))
                .bind(user_id)
                .fetch_all(&self.state.pool)
                .await?
            }
        };
        Ok(orders)
    }

    fn ensure_purchasing_head(&self, user: &User) -> Result<(), ServiceError> {
        if policy::is_purchasing_head(user.role, user.department_id, &self.state.anchors) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "only the head of the purchasing department may do this",
            ))
        }
    }

    async fn require_purchasing_head(&self, actor: &AuthenticatedUser) -> Result<(), ServiceError> {
        let mut conn = self.state.pool.acquire().await?;
        let user = directory::require_actor(&mut conn, actor).await?;
        self.ensure_purchasing_head(&user)
    }
}

/// Creates the order for a finally approved request. Numbered in the
/// request's department.
pub(crate) async fn generate(
    tx: &mut Transaction<'_, Postgres>,
    pr: &PurchaseRequest,
) -> Result<PurchaseOrder, ServiceError> {
    let po_number = numbering::allocate(tx, DocumentKind::PurchaseOrder, pr.department_id).await?;
    let now = Utc::now();
    let po = sqlx::query_as::<_, PurchaseOrder>(
        "INSERT INTO purchase_orders (id, po_number, pr_id, status, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(&po_number)
    .bind(pr.id)
    .bind(PurchaseOrderStatus::Open)
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    let copied = ensure_items(tx, &po).await?;
    info!(po_id = %po.id, pr_id = %pr.id, %po_number, items = copied, "purchase order generated");
    Ok(po)
}

/// Copies the source request's items onto the order if it has none yet.
/// Callers hold the order row lock; the (po_id, position) uniqueness makes a
/// repeated copy a no-op regardless. Returns the number of rows inserted.
pub(crate) async fn ensure_items(
    tx: &mut Transaction<'_, Postgres>,
    po: &PurchaseOrder,
) -> Result<u64, ServiceError> {
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM purchase_order_items WHERE po_id = $1")
            .bind(po.id)
            .fetch_one(&mut **tx)
            .await?;
    if existing > 0 {
        return Ok(0);
    }

    let source = requests::fetch_items(&mut **tx, po.pr_id).await?;
    if source.is_empty() {
        warn!(po_id = %po.id, pr_id = %po.pr_id, "source purchase request has no items");
        return Ok(0);
    }

    let mut inserted = 0;
    for item in &source {
        let result = sqlx::query(
            "INSERT INTO purchase_order_items (id, po_id, position, item_type, item_name, quantity, unit, status, note)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
             ON CONFLICT (po_id, position) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(po.id)
        .bind(item.position)
        .bind(item.item_type)
        .bind(&item.item_name)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(PurchaseOrderItemStatus::Pending)
        .bind(&item.note)
        .execute(&mut **tx)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

pub(crate) async fn lock_order(
    tx: &mut Transaction<'_, Postgres>,
    po_id: Uuid,
) -> Result<Option<PurchaseOrder>, ServiceError> {
    let po =
        sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = $1 FOR UPDATE")
            .bind(po_id)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(po)
}

async fn set_order_status(
    tx: &mut Transaction<'_, Postgres>,
    po_id: Uuid,
    status: PurchaseOrderStatus,
) -> Result<PurchaseOrder, ServiceError> {
    sqlx::query_as::<_, PurchaseOrder>(
        "UPDATE purchase_orders SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *",
    )
    .bind(status)
    .bind(Utc::now())
    .bind(po_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(ServiceError::NotFound(Entity::PurchaseOrder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ItemType;

    fn item(status: PurchaseOrderItemStatus) -> PurchaseOrderItem {
        PurchaseOrderItem {
            id: Uuid::new_v4(),
            po_id: Uuid::new_v4(),
            position: 0,
            item_type: ItemType::Goods,
            item_name: "Toner".into(),
            quantity: Some(2),
            unit: Some("pcs".into()),
            status,
            note: None,
        }
    }

    #[test]
    fn check_outcome_serializes_with_tag() {
        let value =
            serde_json::to_value(CheckOutcome::AlreadyBought(item(PurchaseOrderItemStatus::Bought)))
                .unwrap();
        assert_eq!(value["outcome"], "ALREADY_BOUGHT");
        assert_eq!(value["item"]["status"], "BOUGHT");
        assert_eq!(value["item"]["itemType"], "BARANG");
    }

    #[test]
    fn check_outcome_exposes_item() {
        let bought = CheckOutcome::Bought(item(PurchaseOrderItemStatus::Bought));
        assert_eq!(bought.item().item_name, "Toner");
    }
}
