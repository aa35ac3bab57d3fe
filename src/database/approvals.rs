use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::{ApprovalRequest, NewApprovalRequest};
use crate::database::{idgen, now};
use crate::domain::{ApprovalKind, ApprovalStatus};
use crate::errors::CoreError;

pub fn insert_request(
    conn: &mut PgConnection,
    kind: ApprovalKind,
    resource_id: &str,
    amount: Option<i64>,
    reason: Option<&str>,
    requested_by_id: &str,
) -> Result<ApprovalRequest, CoreError> {
    diesel::insert_into(crate::schema::approval_request::table)
        .values(&NewApprovalRequest {
            id: idgen::next(),
            kind: kind.as_str(),
            resource_type: kind.resource_type(),
            resource_id,
            amount,
            reason,
            requested_by_id,
            status: ApprovalStatus::Pending.as_str(),
            created_at: now(),
        })
        .get_result::<ApprovalRequest>(conn)
        .map_err(Into::into)
}

pub fn lock_request(conn: &mut PgConnection, req_id: i64) -> Result<ApprovalRequest, CoreError> {
    use crate::schema::approval_request::dsl::*;
    approval_request
        .filter(id.eq(req_id))
        .for_update()
        .first::<ApprovalRequest>(conn)
        .optional()?
        .ok_or(CoreError::NotFound("approval"))
}

// a PENDING or APPROVED request already targets this resource
pub fn has_open_request(conn: &mut PgConnection, req_kind: ApprovalKind, req_resource_id: &str) -> Result<bool, CoreError> {
    use crate::schema::approval_request::dsl::*;
    let open = vec![ApprovalStatus::Pending.as_str(), ApprovalStatus::Approved.as_str()];
    diesel::select(diesel::dsl::exists(
        approval_request
            .filter(kind.eq(req_kind.as_str()))
            .filter(resource_id.eq(req_resource_id))
            .filter(status.eq_any(open)),
    ))
    .get_result::<bool>(conn)
    .map_err(Into::into)
}

// newest first, optionally narrowed to one status
pub fn list_requests(
    conn: &mut PgConnection,
    req_status: Option<ApprovalStatus>,
    limit: i64,
) -> Result<Vec<ApprovalRequest>, CoreError> {
    use crate::schema::approval_request::dsl::*;
    let mut query = approval_request.order((created_at.desc(), id.desc())).limit(limit).into_boxed();
    if let Some(req_status) = req_status {
        query = query.filter(status.eq(req_status.as_str()));
    }
    query.load::<ApprovalRequest>(conn).map_err(Into::into)
}

pub fn record_decision(
    conn: &mut PgConnection,
    req_id: i64,
    new_status: ApprovalStatus,
    approver_id: &str,
    req_reason: Option<&str>,
) -> Result<ApprovalRequest, CoreError> {
    use crate::schema::approval_request::dsl::*;
    diesel::update(
        approval_request
            .filter(id.eq(req_id))
            .filter(status.eq(ApprovalStatus::Pending.as_str())),
    )
    .set((
        status.eq(new_status.as_str()),
        approved_by_id.eq(approver_id),
        decision_reason.eq(req_reason),
        decided_at.eq(now()),
    ))
    .get_result::<ApprovalRequest>(conn)
    .optional()?
    .ok_or_else(|| CoreError::Conflict(format!("approval {req_id} is no longer pending")))
}

pub fn mark_executed(conn: &mut PgConnection, req_id: i64) -> Result<ApprovalRequest, CoreError> {
    use crate::schema::approval_request::dsl::*;
    diesel::update(
        approval_request
            .filter(id.eq(req_id))
            .filter(status.eq(ApprovalStatus::Approved.as_str())),
    )
    .set((status.eq(ApprovalStatus::Canceled.as_str()), executed_at.eq(now())))
    .get_result::<ApprovalRequest>(conn)
    .optional()?
    .ok_or_else(|| CoreError::InvalidState(format!("approval {req_id} is not approved")))
}

/// Closes an APPROVED request whose mutation can no longer be applied.
pub fn mark_failed(conn: &mut PgConnection, req_id: i64, cause: &str) -> Result<ApprovalRequest, CoreError> {
    use crate::schema::approval_request::dsl::*;
    diesel::update(
        approval_request
            .filter(id.eq(req_id))
            .filter(status.eq(ApprovalStatus::Approved.as_str())),
    )
    .set((status.eq(ApprovalStatus::Rejected.as_str()), decision_reason.eq(cause)))
    .get_result::<ApprovalRequest>(conn)
    .optional()?
    .ok_or_else(|| CoreError::InvalidState(format!("approval {req_id} is not approved")))
}
