//! Approval routing rules.
//!
//! Every chain climbs from the requester's department to the head of the
//! Finance department, who is the apex approver. The two anchor departments
//! are resolved once at startup and handed in as [`OrgAnchors`] so nothing in
//! here touches the database.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{DepartmentId, Role};

/// Department ids that carry workflow meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgAnchors {
    /// Apex of every approval chain.
    pub finance: DepartmentId,
    /// Owns purchase order assignment and closure.
    pub purchasing: DepartmentId,
}

/// The (role, department) pair a pending approval must be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproverTarget {
    DepartmentManager(DepartmentId),
    DepartmentHead(DepartmentId),
    FinanceHead(DepartmentId),
}

impl ApproverTarget {
    pub fn role(&self) -> Role {
        match self {
            ApproverTarget::DepartmentManager(_) => Role::Manager,
            ApproverTarget::DepartmentHead(_) | ApproverTarget::FinanceHead(_) => {
                Role::HeadDepartment
            }
        }
    }

    pub fn department_id(&self) -> DepartmentId {
        match self {
            ApproverTarget::DepartmentManager(id)
            | ApproverTarget::DepartmentHead(id)
            | ApproverTarget::FinanceHead(id) => *id,
        }
    }

    /// Descriptive tag stored on the approval row. Routing never reads it back.
    pub fn level(&self) -> &'static str {
        match self {
            ApproverTarget::DepartmentManager(_) => "department_manager",
            ApproverTarget::DepartmentHead(_) => "department_head",
            ApproverTarget::FinanceHead(_) => "finance_head",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    /// Another approval is required from this target.
    Next(ApproverTarget),
    /// The actor is the apex; their approval is final.
    Apex,
    /// The actor's role takes no part in approval chains.
    NotParticipant,
}

/// Resolves who approves after an actor holding `role` in `department_id`.
///
/// Used both at submission (with the requester's role) and after each
/// approval (with the decider's role).
pub fn next_step(role: Role, department_id: DepartmentId, anchors: &OrgAnchors) -> ChainStep {
    match role {
        Role::Staff => ChainStep::Next(ApproverTarget::DepartmentManager(department_id)),
        Role::Manager => ChainStep::Next(ApproverTarget::DepartmentHead(department_id)),
        Role::HeadDepartment if department_id == anchors.finance => ChainStep::Apex,
        Role::HeadDepartment => ChainStep::Next(ApproverTarget::FinanceHead(anchors.finance)),
        Role::Admin => ChainStep::NotParticipant,
    }
}

pub fn is_apex(role: Role, department_id: DepartmentId, anchors: &OrgAnchors) -> bool {
    next_step(role, department_id, anchors) == ChainStep::Apex
}

/// Only the apex approver may approve a request they created.
pub fn self_approval_forbidden(
    approver_id: Uuid,
    approver_role: Role,
    approver_department: DepartmentId,
    creator_id: Uuid,
    anchors: &OrgAnchors,
) -> bool {
    approver_id == creator_id && !is_apex(approver_role, approver_department, anchors)
}

pub fn is_purchasing_head(role: Role, department_id: DepartmentId, anchors: &OrgAnchors) -> bool {
    role == Role::HeadDepartment && department_id == anchors.purchasing
}

pub fn is_purchasing_staff(role: Role, department_id: DepartmentId, anchors: &OrgAnchors) -> bool {
    role == Role::Staff && department_id == anchors.purchasing
}

#[cfg(test)]
mod tests {
    use super::*;

    const IT: DepartmentId = 3;
    const FINANCE: DepartmentId = 1;
    const PURCHASING: DepartmentId = 2;

    fn anchors() -> OrgAnchors {
        OrgAnchors {
            finance: FINANCE,
            purchasing: PURCHASING,
        }
    }

    #[test]
    fn staff_escalates_to_manager_of_same_department() {
        assert_eq!(
            next_step(Role::Staff, IT, &anchors()),
            ChainStep::Next(ApproverTarget::DepartmentManager(IT))
        );
    }

    #[test]
    fn manager_escalates_to_head_of_same_department() {
        assert_eq!(
            next_step(Role::Manager, IT, &anchors()),
            ChainStep::Next(ApproverTarget::DepartmentHead(IT))
        );
    }

    #[test]
    fn department_head_escalates_to_finance_head() {
        let step = next_step(Role::HeadDepartment, IT, &anchors());
        assert_eq!(step, ChainStep::Next(ApproverTarget::FinanceHead(FINANCE)));
        let ChainStep::Next(target) = step else {
            unreachable!()
        };
        assert_eq!(target.role(), Role::HeadDepartment);
        assert_eq!(target.department_id(), FINANCE);
        assert_eq!(target.level(), "finance_head");
    }

    #[test]
    fn finance_head_is_apex() {
        assert_eq!(
            next_step(Role::HeadDepartment, FINANCE, &anchors()),
            ChainStep::Apex
        );
        assert!(is_apex(Role::HeadDepartment, FINANCE, &anchors()));
        assert!(!is_apex(Role::Manager, FINANCE, &anchors()));
    }

    #[test]
    fn finance_staff_and_manager_still_climb_their_own_department() {
        assert_eq!(
            next_step(Role::Staff, FINANCE, &anchors()),
            ChainStep::Next(ApproverTarget::DepartmentManager(FINANCE))
        );
        assert_eq!(
            next_step(Role::Manager, FINANCE, &anchors()),
            ChainStep::Next(ApproverTarget::DepartmentHead(FINANCE))
        );
    }

    #[test]
    fn admin_is_not_part_of_any_chain() {
        assert_eq!(
            next_step(Role::Admin, FINANCE, &anchors()),
            ChainStep::NotParticipant
        );
    }

    #[test]
    fn only_finance_head_may_approve_own_request() {
        let actor = Uuid::new_v4();
        let other = Uuid::new_v4();
        let anchors = anchors();

        assert!(!self_approval_forbidden(
            actor,
            Role::HeadDepartment,
            FINANCE,
            actor,
            &anchors
        ));
        assert!(self_approval_forbidden(
            actor,
            Role::HeadDepartment,
            IT,
            actor,
            &anchors
        ));
        assert!(self_approval_forbidden(actor, Role::Manager, IT, actor, &anchors));
        assert!(!self_approval_forbidden(
            actor,
            Role::HeadDepartment,
            IT,
            other,
            &anchors
        ));
    }

    #[test]
    fn purchasing_roles_require_purchasing_department() {
        let anchors = anchors();
        assert!(is_purchasing_head(Role::HeadDepartment, PURCHASING, &anchors));
        assert!(!is_purchasing_head(Role::HeadDepartment, IT, &anchors));
        assert!(!is_purchasing_head(Role::Manager, PURCHASING, &anchors));
        assert!(is_purchasing_staff(Role::Staff, PURCHASING, &anchors));
        assert!(!is_purchasing_staff(Role::Staff, IT, &anchors));
    }
}
