mod test_harness;

use anyhow::Result;
use chrono::Utc;
use procurement_portal::{
    domain::models::{Decision, PurchaseRequestStatus},
    services::{
        approvals::{ApprovalService, DecisionRequest},
        errors::ServiceError,
        requests::RequestService,
    },
};
use test_harness::{actor, goods_item, new_request, pending_count, run_test, seed_department, seed_org};
use uuid::Uuid;

fn approve() -> DecisionRequest {
    DecisionRequest {
        decision: Decision::Approve,
        comment: None,
    }
}

#[tokio::test]
async fn concurrent_decisions_on_one_approval_succeed_once() -> Result<()> {
    run_test(|pool| async move {
        let org = seed_org(&pool).await?;
        let it = seed_department(&pool, "IT").await?;
        let requests = RequestService::new(org.state.clone());
        let approvals = ApprovalService::new(org.state.clone());

        let created = requests
            .create(
                &actor(&it.staff),
                new_request("Servers", vec![goods_item("Server", 2)]),
            )
            .await?;
        let pr_id = created.request.id;
        requests.submit(&actor(&it.staff), pr_id).await?;

        let manager = actor(&it.manager);
        let (first, second) = futures::join!(
            approvals.decide(&manager, pr_id, approve()),
            approvals.decide(&manager, pr_id, approve()),
        );

        let outcomes = [first, second];
        let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(outcomes.iter().any(|outcome| matches!(
            outcome,
            Err(ServiceError::NotAuthorizedOrAlreadyDecided)
        )));

        assert_eq!(pending_count(&pool, pr_id).await?, 1);
        let reloaded = requests.get(pr_id).await?;
        assert_eq!(reloaded.request.status, PurchaseRequestStatus::Submitted);
        let trail = approvals.status(pr_id).await?;
        assert_eq!(trail.len(), 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn concurrent_approve_and_reject_leave_consistent_state() -> Result<()> {
    run_test(|pool| async move {
        let org = seed_org(&pool).await?;
        let it = seed_department(&pool, "IT").await?;
        let requests = RequestService::new(org.state.clone());
        let approvals = ApprovalService::new(org.state.clone());

        let created = requests
            .create(
                &actor(&it.staff),
                new_request("Racks", vec![goods_item("Rack", 1)]),
            )
            .await?;
        let pr_id = created.request.id;
        requests.submit(&actor(&it.staff), pr_id).await?;

        let manager = actor(&it.manager);
        let (approved, rejected) = futures::join!(
            approvals.decide(&manager, pr_id, approve()),
            approvals.decide(
                &manager,
                pr_id,
                DecisionRequest {
                    decision: Decision::Reject,
                    comment: Some("duplicate".to_string()),
                }
            ),
        );
        assert!(approved.is_ok() ^ rejected.is_ok());

        let status = requests.get(pr_id).await?.request.status;
        if approved.is_ok() {
            assert_eq!(status, PurchaseRequestStatus::Submitted);
            assert_eq!(pending_count(&pool, pr_id).await?, 1);
        } else {
            assert_eq!(status, PurchaseRequestStatus::Rejected);
            assert_eq!(pending_count(&pool, pr_id).await?, 0);
        }
        Ok(())
    })
    .await
}

#[tokio::test]
async fn store_refuses_second_pending_approval() -> Result<()> {
    run_test(|pool| async move {
        let org = seed_org(&pool).await?;
        let it = seed_department(&pool, "IT").await?;
        let requests = RequestService::new(org.state.clone());

        let created = requests
            .create(
                &actor(&it.staff),
                new_request("Keyboards", vec![goods_item("Keyboard", 6)]),
            )
            .await?;
        let pr_id = created.request.id;
        requests.submit(&actor(&it.staff), pr_id).await?;

        let result = sqlx::query(
            "INSERT INTO approvals (id, pr_id, approver_id, level, status, created_at)
             VALUES ($1,$2,$3,'department_head','pending',$4)",
        )
        .bind(Uuid::new_v4())
        .bind(pr_id)
        .bind(it.head.id)
        .bind(Utc::now())
        .execute(&pool)
        .await;

        let err = result.expect_err("second pending approval must be rejected");
        let mapped = ServiceError::from(err);
        assert!(matches!(mapped, ServiceError::ConflictingPendingApproval));
        assert_eq!(pending_count(&pool, pr_id).await?, 1);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn concurrent_drafts_receive_distinct_numbers() -> Result<()> {
    run_test(|pool| async move {
        let org = seed_org(&pool).await?;
        let it = seed_department(&pool, "IT").await?;
        let requests = RequestService::new(org.state.clone());
        let staff = actor(&it.staff);
        let manager = actor(&it.manager);

        let (a, b, c) = futures::try_join!(
            requests.create(&staff, new_request("One", vec![goods_item("Mouse", 1)])),
            requests.create(&staff, new_request("Two", vec![goods_item("Mouse", 1)])),
            requests.create(&manager, new_request("Three", vec![goods_item("Mouse", 1)])),
        )?;

        let mut numbers = vec![
            a.request.pr_number,
            b.request.pr_number,
            c.request.pr_number,
        ];
        numbers.sort();
        let expected: Vec<String> = (1..=3)
            .map(|seq| format!("PR-{}-{:05}", it.id, seq))
            .collect();
        assert_eq!(numbers, expected);
        Ok(())
    })
    .await
}
