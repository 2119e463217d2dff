//! Read side of the organisation directory: users, departments and the
//! approver lookups the workflow needs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        models::{DepartmentId, Role, User},
        policy::{ApproverTarget, OrgAnchors},
    },
    infrastructure::{
        auth::AuthenticatedUser, config::WorkflowConfig, db::PgPool, state::AppState,
    },
};

use super::errors::{Entity, ServiceError};

const USER_COLUMNS: &str = "id, name, email, role, department_id, created_at";

pub async fn find_user(conn: &mut PgConnection, id: Uuid) -> Result<Option<User>, ServiceError> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

pub async fn require_user(conn: &mut PgConnection, id: Uuid) -> Result<User, ServiceError> {
    find_user(conn, id)
        .await?
        .ok_or(ServiceError::NotFound(Entity::User))
}

/// Loads the caller's current directory entry. Workflow rules use this
/// entry, not the role baked into the token.
pub async fn require_actor(
    conn: &mut PgConnection,
    actor: &AuthenticatedUser,
) -> Result<User, ServiceError> {
    let user = require_user(conn, actor.user_id).await?;
    if user.role != actor.role {
        warn!(
            user_id = %user.id,
            token_role = %actor.role,
            current_role = %user.role,
            "token role is stale; using directory role"
        );
    }
    Ok(user)
}

/// Picks the approver for `target`. When several users share the role and
/// department, the earliest provisioned one wins so the trail is predictable.
pub async fn find_approver(
    conn: &mut PgConnection,
    target: ApproverTarget,
) -> Result<User, ServiceError> {
    let approver = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE role = $1 AND department_id = $2
         ORDER BY created_at ASC, id ASC
         LIMIT 1"
    ))
    .bind(target.role())
    .bind(target.department_id())
    .fetch_optional(conn)
    .await?;

    approver.ok_or(ServiceError::ApproverNotFound {
        role: target.role(),
        department_id: target.department_id(),
    })
}

pub async fn department_id_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<DepartmentId>, ServiceError> {
    let id = sqlx::query_scalar::<_, DepartmentId>("SELECT id FROM departments WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Turns the configured anchor department names into ids. Run once at startup.
pub async fn resolve_anchors(
    pool: &PgPool,
    config: &WorkflowConfig,
) -> Result<OrgAnchors, ServiceError> {
    let finance = department_id_by_name(pool, &config.finance_department)
        .await?
        .ok_or_else(|| ServiceError::AnchorMissing(config.finance_department.clone()))?;
    let purchasing = department_id_by_name(pool, &config.purchasing_department)
        .await?
        .ok_or_else(|| ServiceError::AnchorMissing(config.purchasing_department.clone()))?;

    info!(finance, purchasing, "resolved anchor departments");
    Ok(OrgAnchors {
        finance,
        purchasing,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub role: Option<Role>,
    pub department_id: Option<DepartmentId>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub user: User,
    pub department_name: String,
}

pub struct DirectoryService {
    state: Arc<AppState>,
}

impl DirectoryService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Lists users, optionally narrowed by role and department. Used to pick
    /// purchasing staff when assigning orders.
    pub async fn list_users(&self, filter: UserFilter) -> Result<Vec<DirectoryEntry>, ServiceError> {
        let entries = sqlx::query_as::<_, DirectoryEntry>(
            r#"
            SELECT u.id, u.name, u.email, u.role, u.department_id, u.created_at,
                   d.name AS department_name
            FROM users u
            JOIN departments d ON d.id = u.department_id
            WHERE ($1::user_role IS NULL OR u.role = $1)
              AND ($2::integer IS NULL OR u.department_id = $2)
            ORDER BY u.name ASC, u.id ASC
            "#,
        )
        .bind(filter.role)
        .bind(filter.department_id)
        .fetch_all(&self.state.pool)
        .await?;
        Ok(entries)
    }
}
