use std::{convert::TryFrom, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef},
    FromRow, Postgres, Type, TypeInfo,
};
use uuid::Uuid;

pub type DepartmentId = i32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Manager,
    HeadDepartment,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::HeadDepartment => "head_department",
            Role::Admin => "admin",
        }
    }
}

impl Role {
    fn parse_normalized(value: &str) -> Result<Self, RoleParseError> {
        match value {
            "staff" => Ok(Role::Staff),
            "manager" => Ok(Role::Manager),
            "head_department" => Ok(Role::HeadDepartment),
            "admin" => Ok(Role::Admin),
            _ => Err(RoleParseError::new(value)),
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = RoleParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Role::parse_normalized(&normalized)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<Postgres> for Role {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("user_role")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        matches!(ty.name(), "user_role" | "text" | "varchar" | "bpchar")
    }
}

impl PgHasArrayType for Role {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_user_role")
    }
}

impl<'q> Encode<'q, Postgres> for Role {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let value = self.as_str();
        <&str as Encode<Postgres>>::encode_by_ref(&value, buf)
    }

    fn size_hint(&self) -> usize {
        let value = self.as_str();
        <&str as Encode<Postgres>>::size_hint(&value)
    }
}

impl<'r> Decode<'r, Postgres> for Role {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        Role::try_from(raw).map_err(|err| Box::new(err) as BoxDynError)
    }
}

#[derive(Debug, Clone)]
pub struct RoleParseError {
    value: String,
}

impl RoleParseError {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported role value: {}", self.value)
    }
}

impl std::error::Error for RoleParseError {}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department_id: DepartmentId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "purchase_request_status", rename_all = "snake_case")]
pub enum PurchaseRequestStatus {
    Draft,
    Submitted,
    FinalApproved,
    Rejected,
    Completed,
}

impl PurchaseRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseRequestStatus::Draft => "draft",
            PurchaseRequestStatus::Submitted => "submitted",
            PurchaseRequestStatus::FinalApproved => "final_approved",
            PurchaseRequestStatus::Rejected => "rejected",
            PurchaseRequestStatus::Completed => "completed",
        }
    }

    /// `Rejected` and `Completed` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseRequestStatus::Rejected | PurchaseRequestStatus::Completed
        )
    }
}

/// Line item kind. Wire tags follow the procurement team's vocabulary:
/// `BARANG` for physical goods, `JASA` for services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[sqlx(type_name = "item_type", rename_all = "snake_case")]
pub enum ItemType {
    #[serde(rename = "BARANG")]
    #[sqlx(rename = "barang")]
    Goods,
    #[serde(rename = "JASA")]
    #[sqlx(rename = "jasa")]
    Service,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub id: Uuid,
    pub pr_number: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub department_id: DepartmentId,
    pub status: PurchaseRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequestItem {
    pub id: Uuid,
    pub pr_id: Uuid,
    pub position: i32,
    pub item_type: ItemType,
    pub item_name: String,
    pub quantity: Option<i32>,
    pub unit: Option<String>,
    pub price_per_unit: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "approval_status", rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn resulting_status(&self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: Uuid,
    pub pr_id: Uuid,
    pub approver_id: Uuid,
    pub level: String,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Display projection of an approval joined with the approver's identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub level: String,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver: ApproverIdentity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverIdentity {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub email: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "purchase_order_status", rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Open,
    Assigned,
    InProgress,
    Completed,
    Closed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Open => "open",
            PurchaseOrderStatus::Assigned => "assigned",
            PurchaseOrderStatus::InProgress => "in_progress",
            PurchaseOrderStatus::Completed => "completed",
            PurchaseOrderStatus::Closed => "closed",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Open | PurchaseOrderStatus::Assigned
        )
    }

    pub fn is_completable(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Open
                | PurchaseOrderStatus::Assigned
                | PurchaseOrderStatus::InProgress
        )
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub po_number: String,
    pub pr_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub status: PurchaseOrderStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "purchase_order_item_status", rename_all = "snake_case")]
pub enum PurchaseOrderItemStatus {
    Pending,
    Bought,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderItem {
    pub id: Uuid,
    pub po_id: Uuid,
    pub position: i32,
    pub item_type: ItemType,
    pub item_name: String,
    pub quantity: Option<i32>,
    pub unit: Option<String>,
    pub status: PurchaseOrderItemStatus,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(Role::try_from(" Head_Department ").unwrap(), Role::HeadDepartment);
        assert_eq!(Role::try_from("STAFF").unwrap(), Role::Staff);
        assert!(Role::try_from("director").is_err());
    }

    #[test]
    fn item_type_uses_procurement_wire_tags() {
        assert_eq!(
            serde_json::to_value(ItemType::Goods).unwrap(),
            serde_json::json!("BARANG")
        );
        let parsed: ItemType = serde_json::from_value(serde_json::json!("JASA")).unwrap();
        assert_eq!(parsed, ItemType::Service);
    }

    #[test]
    fn only_rejected_and_completed_requests_are_terminal() {
        assert!(PurchaseRequestStatus::Rejected.is_terminal());
        assert!(PurchaseRequestStatus::Completed.is_terminal());
        assert!(!PurchaseRequestStatus::FinalApproved.is_terminal());
        assert!(!PurchaseRequestStatus::Draft.is_terminal());
    }

    #[test]
    fn closed_orders_cannot_be_reassigned_or_completed() {
        assert!(PurchaseOrderStatus::Open.is_assignable());
        assert!(PurchaseOrderStatus::Assigned.is_assignable());
        assert!(!PurchaseOrderStatus::Closed.is_assignable());
        assert!(!PurchaseOrderStatus::Completed.is_completable());
        assert!(!PurchaseOrderStatus::Cancelled.is_completable());
    }
}
