//! Dual-control approval gate for sensitive balance mutations.
//!
//! Call sites describe the mutation as a [`SensitiveMutation`] and hand it to
//! [`submit_gated`], which picks the executor from the runtime toggle: either
//! the ledger is changed right away, or a PENDING approval request is created
//! and a second admin has to approve it before [`execute`] applies it.

use diesel::{Connection, PgConnection};
use tracing::{info, warn};

use crate::database::models::{ApprovalRequest, Order};
use crate::database::{approvals, ledger, orders, settings, users};
use crate::domain::{ApprovalKind, ApprovalStatus, Decision, HistoryKind};
use crate::errors::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum SensitiveMutation {
    /// Signed: positive credits, negative debits.
    PointsAdjust { user_id: String, amount: i64, reason: String },
    /// `amount` defaults to the full order cost.
    OrderRefund { order_id: i64, amount: Option<i64>, reason: String },
}

impl SensitiveMutation {
    fn kind(&self) -> ApprovalKind {
        match self {
            SensitiveMutation::PointsAdjust { .. } => ApprovalKind::PointsAdjust,
            SensitiveMutation::OrderRefund { .. } => ApprovalKind::OrderRefund,
        }
    }

    fn from_request(request: &ApprovalRequest) -> Result<Self, CoreError> {
        let reason = request.reason.clone().unwrap_or_default();
        match request.kind()? {
            ApprovalKind::PointsAdjust => Ok(SensitiveMutation::PointsAdjust {
                user_id: request.resource_id.clone(),
                amount: request
                    .amount
                    .ok_or_else(|| CoreError::Internal(format!("approval {} has no amount", request.id)))?,
                reason,
            }),
            ApprovalKind::OrderRefund => Ok(SensitiveMutation::OrderRefund {
                order_id: request
                    .resource_id
                    .parse()
                    .map_err(|_| CoreError::Internal(format!("approval {} has a bad order id", request.id)))?,
                amount: request.amount,
                reason,
            }),
        }
    }

    fn resource_id(&self) -> String {
        match self {
            SensitiveMutation::PointsAdjust { user_id, .. } => user_id.clone(),
            SensitiveMutation::OrderRefund { order_id, .. } => order_id.to_string(),
        }
    }

    fn amount(&self) -> Option<i64> {
        match self {
            SensitiveMutation::PointsAdjust { amount, .. } => Some(*amount),
            SensitiveMutation::OrderRefund { amount, .. } => *amount,
        }
    }

    fn reason(&self) -> &str {
        match self {
            SensitiveMutation::PointsAdjust { reason, .. } | SensitiveMutation::OrderRefund { reason, .. } => reason,
        }
    }
}

#[derive(Debug)]
pub enum MutationResult {
    Balance { user_id: String, balance: i64 },
    Refund { balance: i64, order: Order },
}

#[derive(Debug)]
pub enum GateOutcome {
    Executed(MutationResult),
    Pending(ApprovalRequest),
}

pub trait GatedMutation {
    fn submit(&self, conn: &mut PgConnection, requested_by: &str, mutation: SensitiveMutation) -> Result<GateOutcome, CoreError>;
}

/// Dual control off: the mutation goes straight to the ledger.
#[derive(Debug, Default)]
pub struct ImmediateExecutor;

impl GatedMutation for ImmediateExecutor {
    fn submit(&self, conn: &mut PgConnection, requested_by: &str, mutation: SensitiveMutation) -> Result<GateOutcome, CoreError> {
        info!(requested_by, kind = mutation.kind().as_str(), "executing sensitive mutation");
        perform(conn, &mutation).map(GateOutcome::Executed)
    }
}

/// Dual control on: the mutation is validated and parked as a PENDING request.
#[derive(Debug, Default)]
pub struct ApprovalGatedExecutor;

impl GatedMutation for ApprovalGatedExecutor {
    fn submit(&self, conn: &mut PgConnection, requested_by: &str, mutation: SensitiveMutation) -> Result<GateOutcome, CoreError> {
        validate(conn, &mutation)?;
        request_approval(
            conn,
            mutation.kind(),
            &mutation.resource_id(),
            mutation.amount(),
            Some(mutation.reason()),
            requested_by,
        )
        .map(GateOutcome::Pending)
    }
}

pub fn executor(dual_control_enabled: bool) -> Box<dyn GatedMutation> {
    if dual_control_enabled {
        Box::new(ApprovalGatedExecutor)
    } else {
        Box::new(ImmediateExecutor)
    }
}

pub fn submit_gated(conn: &mut PgConnection, requested_by: &str, mutation: SensitiveMutation) -> Result<GateOutcome, CoreError> {
    let enabled = settings::is_dual_control_enabled(conn)?;
    executor(enabled).submit(conn, requested_by, mutation)
}

fn validate(conn: &mut PgConnection, mutation: &SensitiveMutation) -> Result<(), CoreError> {
    match mutation {
        SensitiveMutation::PointsAdjust { user_id, amount, .. } => {
            if *amount == 0 {
                return Err(CoreError::BadRequest("amount".to_string()));
            }
            users::load_user(conn, user_id)?.ok_or(CoreError::NotFound("user"))?;
        }
        SensitiveMutation::OrderRefund { order_id, amount, .. } => {
            let order = orders::load_order(conn, *order_id)?;
            if order.refunded_at.is_some() {
                return Err(CoreError::Conflict(format!("order {order_id} is already refunded")));
            }
            if let Some(amount) = amount {
                if *amount <= 0 || *amount > order.cost {
                    return Err(CoreError::BadRequest("amount".to_string()));
                }
            }
        }
    }
    let kind = mutation.kind();
    let resource_id = mutation.resource_id();
    if approvals::has_open_request(conn, kind, &resource_id)? {
        return Err(CoreError::Conflict(format!(
            "{} {resource_id} already has an open {} approval",
            kind.resource_type(),
            kind.as_str()
        )));
    }
    Ok(())
}

fn perform(conn: &mut PgConnection, mutation: &SensitiveMutation) -> Result<MutationResult, CoreError> {
    match mutation {
        SensitiveMutation::PointsAdjust { user_id, amount, reason } => {
            let description = format!("Admin adjustment: {reason}");
            let balance = match amount {
                0 => return Err(CoreError::BadRequest("amount".to_string())),
                a if *a > 0 => ledger::add_points(conn, user_id, *a, HistoryKind::AdminAdjustment, &description)?,
                a => ledger::deduct_points(conn, user_id, -*a, HistoryKind::AdminAdjustment, &description)?,
            };
            Ok(MutationResult::Balance {
                user_id: user_id.clone(),
                balance,
            })
        }
        SensitiveMutation::OrderRefund { order_id, amount, reason } => {
            let amount = match amount {
                Some(amount) => *amount,
                None => orders::load_order(conn, *order_id)?.cost,
            };
            let (balance, order) = orders::refund_order(conn, *order_id, amount, reason)?;
            Ok(MutationResult::Refund { balance, order })
        }
    }
}

pub fn request_approval(
    conn: &mut PgConnection,
    kind: ApprovalKind,
    resource_id: &str,
    amount: Option<i64>,
    reason: Option<&str>,
    requested_by: &str,
) -> Result<ApprovalRequest, CoreError> {
    let request = approvals::insert_request(conn, kind, resource_id, amount, reason, requested_by)?;
    info!(approval_id = request.id, kind = kind.as_str(), resource_id, requested_by, "approval requested");
    Ok(request)
}

/// Records the decision of a second admin. The requester can never decide
/// their own request.
pub fn decide(
    conn: &mut PgConnection,
    approval_id: i64,
    decision: Decision,
    approver_id: &str,
    reason: Option<&str>,
) -> Result<ApprovalRequest, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let request = approvals::lock_request(conn, approval_id)?;
        if request.status()? != ApprovalStatus::Pending {
            return Err(CoreError::Conflict(format!("approval {approval_id} is {}", request.status)));
        }
        if request.requested_by_id == approver_id {
            return Err(CoreError::Forbidden("requester cannot decide their own approval".to_string()));
        }
        let request = approvals::record_decision(conn, approval_id, decision.resulting_status(), approver_id, reason)?;
        info!(approval_id, approver_id, status = request.status.as_str(), "approval decided");
        Ok(request)
    })
}

#[derive(Debug)]
pub enum ExecuteOutcome {
    Executed { approval: ApprovalRequest, result: MutationResult },
    AlreadyExecuted(ApprovalRequest),
    /// The mutation no longer applies; the request was closed as REJECTED.
    Failed { approval: ApprovalRequest, cause: CoreError },
}

// failures that retrying the same mutation cannot fix
fn closes_request(err: &CoreError) -> bool {
    matches!(
        err,
        CoreError::Conflict(_)
            | CoreError::InvalidState(_)
            | CoreError::InsufficientBalance { .. }
            | CoreError::BadRequest(_)
            | CoreError::NotFound(_)
    )
}

/// Applies an APPROVED request and closes it. Runs under the request's row
/// lock, so concurrent or repeated calls apply the mutation at most once.
///
/// The mutation runs in a savepoint. When it fails for good (the order was
/// refunded meanwhile, the debit would overdraw) the request is closed as
/// REJECTED with the cause as its decision reason instead of staying APPROVED.
pub fn execute(conn: &mut PgConnection, approval_id: i64) -> Result<ExecuteOutcome, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let request = approvals::lock_request(conn, approval_id)?;
        match request.status()? {
            ApprovalStatus::Canceled => Ok(ExecuteOutcome::AlreadyExecuted(request)),
            ApprovalStatus::Approved => {
                let mutation = SensitiveMutation::from_request(&request)?;
                match conn.transaction::<_, CoreError, _>(|conn| perform(conn, &mutation)) {
                    Ok(result) => {
                        let approval = approvals::mark_executed(conn, approval_id)?;
                        info!(approval_id, kind = approval.kind.as_str(), "approval executed");
                        Ok(ExecuteOutcome::Executed { approval, result })
                    }
                    Err(cause) if closes_request(&cause) => {
                        let approval = approvals::mark_failed(conn, approval_id, &cause.to_string())?;
                        warn!(approval_id, error = %cause, "approved mutation failed, request closed");
                        Ok(ExecuteOutcome::Failed { approval, cause })
                    }
                    Err(e) => Err(e),
                }
            }
            status => Err(CoreError::InvalidState(format!("approval {approval_id} is {}", status.as_str()))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ledger::{add_points, get_balance};
    use crate::database::testing;
    use crate::domain::OrderStatus;

    #[test]
    fn test_dual_control_scenario() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            settings::set_dual_control_enabled(conn, true)?;
            let admin_a = testing::create_user(conn, "admin");
            let admin_b = testing::create_user(conn, "admin");
            let user = testing::create_user(conn, "user");
            add_points(conn, &user, 10, HistoryKind::Purchase, "top up")?;

            let mutation = SensitiveMutation::PointsAdjust {
                user_id: user.clone(),
                amount: 50,
                reason: "goodwill".to_string(),
            };
            let request = match submit_gated(conn, &admin_a, mutation)? {
                GateOutcome::Pending(request) => request,
                other => panic!("expected pending, got {other:?}"),
            };
            assert_eq!(request.status()?, ApprovalStatus::Pending);
            assert_eq!(get_balance(conn, &user)?.current_points, 10);

            assert!(matches!(execute(conn, request.id), Err(CoreError::InvalidState(_))));
            assert!(matches!(
                decide(conn, request.id, Decision::Approve, &admin_a, None),
                Err(CoreError::Forbidden(_))
            ));
            let approved = decide(conn, request.id, Decision::Approve, &admin_b, Some("ok"))?;
            assert_eq!(approved.status()?, ApprovalStatus::Approved);
            assert_eq!(approved.approved_by_id.as_deref(), Some(admin_b.as_str()));
            assert!(matches!(
                decide(conn, request.id, Decision::Reject, &admin_b, None),
                Err(CoreError::Conflict(_))
            ));

            match execute(conn, request.id)? {
                ExecuteOutcome::Executed { approval, result } => {
                    assert_eq!(approval.status()?, ApprovalStatus::Canceled);
                    assert!(matches!(result, MutationResult::Balance { balance: 60, .. }));
                }
                other => panic!("expected execution, got {other:?}"),
            }
            assert!(matches!(execute(conn, request.id)?, ExecuteOutcome::AlreadyExecuted(_)));
            assert_eq!(get_balance(conn, &user)?.current_points, 60);
            Ok(())
        });
    }

    #[test]
    fn test_immediate_when_disabled() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            settings::set_dual_control_enabled(conn, false)?;
            let admin = testing::create_user(conn, "admin");
            let user = testing::create_user(conn, "user");
            add_points(conn, &user, 30, HistoryKind::Purchase, "top up")?;

            let debit = SensitiveMutation::PointsAdjust {
                user_id: user.clone(),
                amount: -20,
                reason: "chargeback".to_string(),
            };
            assert!(matches!(
                submit_gated(conn, &admin, debit)?,
                GateOutcome::Executed(MutationResult::Balance { balance: 10, .. })
            ));

            let overdraw = SensitiveMutation::PointsAdjust {
                user_id: user.clone(),
                amount: -20,
                reason: "chargeback".to_string(),
            };
            assert!(matches!(
                submit_gated(conn, &admin, overdraw),
                Err(CoreError::InsufficientBalance { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn test_gated_order_refund() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let admin_a = testing::create_user(conn, "admin");
            let admin_b = testing::create_user(conn, "owner");
            let user = testing::create_user(conn, "user");
            let site = testing::create_site(conn, 25);
            add_points(conn, &user, 100, HistoryKind::Purchase, "top up")?;
            let order = orders::create_order(conn, &user, &site, "item", "https://stock.test/item")?;
            orders::mark_processing(conn, order.id, &format!("T-gate-{}", order.id))?;

            let refund = SensitiveMutation::OrderRefund {
                order_id: order.id,
                amount: None,
                reason: "stuck at provider".to_string(),
            };
            let request = match ApprovalGatedExecutor.submit(conn, &admin_a, refund)? {
                GateOutcome::Pending(request) => request,
                other => panic!("expected pending, got {other:?}"),
            };
            assert_eq!(request.resource_type, "order");
            decide(conn, request.id, Decision::Approve, &admin_b, None)?;

            match execute(conn, request.id)? {
                ExecuteOutcome::Executed {
                    result: MutationResult::Refund { balance, order },
                    ..
                } => {
                    assert_eq!(balance, 100);
                    assert_eq!(order.status()?, OrderStatus::Refunded);
                }
                other => panic!("expected refund, got {other:?}"),
            }
            assert!(matches!(execute(conn, request.id)?, ExecuteOutcome::AlreadyExecuted(_)));
            assert_eq!(get_balance(conn, &user)?.current_points, 100);

            let again = SensitiveMutation::OrderRefund {
                order_id: order.id,
                amount: None,
                reason: "twice".to_string(),
            };
            assert!(matches!(
                ApprovalGatedExecutor.submit(conn, &admin_a, again),
                Err(CoreError::Conflict(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_second_open_request_is_a_conflict() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let admin_a = testing::create_user(conn, "admin");
            let admin_b = testing::create_user(conn, "admin");
            let user = testing::create_user(conn, "user");
            let site = testing::create_site(conn, 25);
            add_points(conn, &user, 100, HistoryKind::Purchase, "top up")?;
            let order = orders::create_order(conn, &user, &site, "item", "https://stock.test/item")?;

            let refund = || SensitiveMutation::OrderRefund {
                order_id: order.id,
                amount: None,
                reason: "duplicate ticket".to_string(),
            };
            let first = match ApprovalGatedExecutor.submit(conn, &admin_a, refund())? {
                GateOutcome::Pending(request) => request,
                other => panic!("expected pending, got {other:?}"),
            };
            assert!(matches!(
                ApprovalGatedExecutor.submit(conn, &admin_b, refund()),
                Err(CoreError::Conflict(_))
            ));
            decide(conn, first.id, Decision::Approve, &admin_b, None)?;
            assert!(matches!(
                ApprovalGatedExecutor.submit(conn, &admin_b, refund()),
                Err(CoreError::Conflict(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_approved_refund_of_refunded_order_is_closed() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let admin_a = testing::create_user(conn, "admin");
            let admin_b = testing::create_user(conn, "admin");
            let user = testing::create_user(conn, "user");
            let site = testing::create_site(conn, 25);
            add_points(conn, &user, 100, HistoryKind::Purchase, "top up")?;
            let order = orders::create_order(conn, &user, &site, "item", "https://stock.test/item")?;
            orders::mark_processing(conn, order.id, &format!("T-closed-{}", order.id))?;

            let refund = SensitiveMutation::OrderRefund {
                order_id: order.id,
                amount: None,
                reason: "stuck".to_string(),
            };
            let request = match ApprovalGatedExecutor.submit(conn, &admin_a, refund)? {
                GateOutcome::Pending(request) => request,
                other => panic!("expected pending, got {other:?}"),
            };
            decide(conn, request.id, Decision::Approve, &admin_b, None)?;
            orders::fail_and_refund(conn, order.id, "provider failed")?;
            assert_eq!(get_balance(conn, &user)?.current_points, 100);

            match execute(conn, request.id)? {
                ExecuteOutcome::Failed { approval, cause } => {
                    assert!(matches!(cause, CoreError::Conflict(_)));
                    assert_eq!(approval.status()?, ApprovalStatus::Rejected);
                    assert!(approval.decision_reason.unwrap().contains("already refunded"));
                    assert!(approval.executed_at.is_none());
                }
                other => panic!("expected a closed request, got {other:?}"),
            }
            assert!(matches!(execute(conn, request.id), Err(CoreError::InvalidState(_))));
            assert_eq!(get_balance(conn, &user)?.current_points, 100);

            let retry = SensitiveMutation::OrderRefund {
                order_id: order.id,
                amount: None,
                reason: "again".to_string(),
            };
            assert!(matches!(
                ApprovalGatedExecutor.submit(conn, &admin_a, retry),
                Err(CoreError::Conflict(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_approved_overdraw_is_closed() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let admin_a = testing::create_user(conn, "admin");
            let admin_b = testing::create_user(conn, "admin");
            let user = testing::create_user(conn, "user");
            add_points(conn, &user, 60, HistoryKind::Purchase, "top up")?;

            let debit = SensitiveMutation::PointsAdjust {
                user_id: user.clone(),
                amount: -50,
                reason: "chargeback".to_string(),
            };
            let request = match ApprovalGatedExecutor.submit(conn, &admin_a, debit)? {
                GateOutcome::Pending(request) => request,
                other => panic!("expected pending, got {other:?}"),
            };
            decide(conn, request.id, Decision::Approve, &admin_b, None)?;
            ledger::deduct_points(conn, &user, 20, HistoryKind::Usage, "order")?;

            assert!(matches!(
                execute(conn, request.id)?,
                ExecuteOutcome::Failed {
                    cause: CoreError::InsufficientBalance { required: 50, available: 40 },
                    ..
                }
            ));
            assert_eq!(get_balance(conn, &user)?.current_points, 40);
            assert!(!approvals::has_open_request(conn, ApprovalKind::PointsAdjust, &user)?);
            Ok(())
        });
    }

    #[test]
    fn test_rejected_request_cannot_execute() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let admin_a = testing::create_user(conn, "admin");
            let admin_b = testing::create_user(conn, "admin");
            let user = testing::create_user(conn, "user");
            let request = request_approval(conn, ApprovalKind::PointsAdjust, &user, Some(5), None, &admin_a)?;
            let rejected = decide(conn, request.id, Decision::Reject, &admin_b, Some("no ticket"))?;
            assert_eq!(rejected.status()?, ApprovalStatus::Rejected);
            assert!(matches!(execute(conn, request.id), Err(CoreError::InvalidState(_))));
            assert!(matches!(execute(conn, -1), Err(CoreError::NotFound(_))));
            Ok(())
        });
    }
}
