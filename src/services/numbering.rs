use sqlx::{PgConnection, Postgres, Transaction};
use tracing::info;

use crate::domain::{
    models::DepartmentId,
    numbering::{self, DocumentKind},
};

use super::errors::ServiceError;

/// Allocates the next number for `kind` in `department_id`.
///
/// Takes a transaction-scoped advisory lock on (kind, department) so
/// concurrent allocations for the same department queue behind each other
/// until the caller commits. The unique index on the number column backs this.
pub async fn allocate(
    tx: &mut Transaction<'_, Postgres>,
    kind: DocumentKind,
    department_id: DepartmentId,
) -> Result<String, ServiceError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind(kind.lock_namespace())
        .bind(department_id)
        .execute(&mut **tx)
        .await?;

    let greatest = greatest_number(&mut **tx, kind, department_id).await?;
    let number = numbering::next_number(kind, department_id, greatest.as_deref())?;
    info!(%kind, department_id, %number, "allocated document number");
    Ok(number)
}

/// Number the next allocation would receive. Nothing is reserved.
pub async fn peek(
    conn: &mut PgConnection,
    kind: DocumentKind,
    department_id: DepartmentId,
) -> Result<String, ServiceError> {
    let greatest = greatest_number(conn, kind, department_id).await?;
    Ok(numbering::next_number(
        kind,
        department_id,
        greatest.as_deref(),
    )?)
}

async fn greatest_number(
    conn: &mut PgConnection,
    kind: DocumentKind,
    department_id: DepartmentId,
) -> Result<Option<String>, ServiceError> {
    let (table, column) = match kind {
        DocumentKind::PurchaseRequest => ("purchase_requests", "pr_number"),
        DocumentKind::PurchaseOrder => ("purchase_orders", "po_number"),
    };
    let sql = format!(
        "SELECT {column} FROM {table} WHERE {column} LIKE $1 ORDER BY {column} COLLATE \"C\" DESC LIMIT 1"
    );
    let greatest = sqlx::query_scalar::<_, String>(&sql)
        .bind(format!("{}%", numbering::prefix(kind, department_id)))
        .fetch_optional(conn)
        .await?;
    Ok(greatest)
}
