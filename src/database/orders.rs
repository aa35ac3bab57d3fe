use chrono::NaiveDateTime;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{info, warn};

use crate::database::ledger::{self, RefundOutcome};
use crate::database::models::{NewOrder, Order};
use crate::database::{catalog, idgen, now};
use crate::domain::{HistoryKind, OrderStatus};
use crate::errors::CoreError;

/// Result of a guarded order transition.
#[derive(Debug)]
pub enum Transition {
    Applied(Order),
    /// The order was already past the requested state; nothing was written.
    Unchanged(Order),
}

impl Transition {
    pub fn into_order(self) -> Order {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }
}

/// Creates a PENDING order and debits its cost in one transaction.
///
/// If the debit fails the whole transaction rolls back, so an order row never
/// exists without the matching USAGE history entry.
pub fn create_order(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_site_id: &str,
    req_item_id: &str,
    req_url: &str,
) -> Result<Order, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let order_cost = catalog::resolve_cost(conn, req_site_id)?;
        let order_id = idgen::next();
        let created = now();

        let order = diesel::insert_into(crate::schema::orders::table)
            .values(&NewOrder {
                id: order_id,
                user_id: req_user_id,
                stock_site_id: req_site_id,
                stock_item_id: req_item_id,
                source_url: req_url,
                cost: order_cost,
                status: OrderStatus::Pending.as_str(),
                dispatch_attempts: 1,
                created_at: created,
                updated_at: created,
            })
            .get_result::<Order>(conn)?;

        let description = format!("Order {order_id}: {req_site_id} item {req_item_id}");
        ledger::debit(conn, req_user_id, order_cost, HistoryKind::Usage, &description, Some(order_id))?;

        info!(order_id, user_id = req_user_id, cost = order_cost, "order created");
        Ok(order)
    })
}

pub fn load_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Order, CoreError> {
    use crate::schema::orders::dsl::*;
    orders
        .filter(id.eq(req_order_id))
        .first::<Order>(conn)
        .optional()?
        .ok_or(CoreError::NotFound("order"))
}

fn lock_order(conn: &mut PgConnection, req_order_id: i64) -> Result<Order, CoreError> {
    use crate::schema::orders::dsl::*;
    orders
        .filter(id.eq(req_order_id))
        .for_update()
        .first::<Order>(conn)
        .optional()?
        .ok_or(CoreError::NotFound("order"))
}

pub fn lock_order_by_task(conn: &mut PgConnection, req_task_id: &str) -> Result<Order, CoreError> {
    use crate::schema::orders::dsl::*;
    orders
        .filter(task_id.eq(req_task_id))
        .for_update()
        .first::<Order>(conn)
        .optional()?
        .ok_or(CoreError::NotFound("task"))
}

// newest first
pub fn list_orders_for_user(conn: &mut PgConnection, req_user_id: &str, limit: i64) -> Result<Vec<Order>, CoreError> {
    use crate::schema::orders::dsl::*;
    orders
        .filter(user_id.eq(req_user_id))
        .order((created_at.desc(), id.desc()))
        .limit(limit)
        .load::<Order>(conn)
        .map_err(Into::into)
}

pub fn mark_processing(conn: &mut PgConnection, req_order_id: i64, req_task_id: &str) -> Result<Transition, CoreError> {
    use crate::schema::orders::dsl::*;
    let updated = diesel::update(
        orders
            .filter(id.eq(req_order_id))
            .filter(status.eq(OrderStatus::Pending.as_str())),
    )
    .set((
        status.eq(OrderStatus::Processing.as_str()),
        task_id.eq(req_task_id),
        updated_at.eq(now()),
    ))
    .get_result::<Order>(conn)
    .optional()?;

    match updated {
        Some(order) => {
            info!(order_id = req_order_id, task_id = req_task_id, "order dispatched");
            Ok(Transition::Applied(order))
        }
        None => load_order(conn, req_order_id).map(Transition::Unchanged),
    }
}

pub fn mark_ready(
    conn: &mut PgConnection,
    req_order_id: i64,
    req_download_url: &str,
    req_file_name: Option<&str>,
) -> Result<Transition, CoreError> {
    use crate::schema::orders::dsl::*;
    let updated = diesel::update(
        orders
            .filter(id.eq(req_order_id))
            .filter(status.eq_any(vec![OrderStatus::Pending.as_str(), OrderStatus::Processing.as_str()])),
    )
    .set((
        status.eq(OrderStatus::Ready.as_str()),
        download_url.eq(req_download_url),
        file_name.eq(req_file_name),
        completed_at.eq(now()),
        updated_at.eq(now()),
    ))
    .get_result::<Order>(conn)
    .optional()?;

    match updated {
        Some(order) => {
            info!(order_id = req_order_id, "order ready");
            Ok(Transition::Applied(order))
        }
        None => load_order(conn, req_order_id).map(Transition::Unchanged),
    }
}

/// Marks a non-terminal order FAILED and refunds its cost, atomically.
///
/// Terminal orders are left untouched, which makes this safe to call from the
/// webhook, the dispatcher and the reconciliation sweeps for the same order.
pub fn fail_and_refund(conn: &mut PgConnection, req_order_id: i64, message: &str) -> Result<Transition, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let order = lock_order(conn, req_order_id)?;
        if !order.status()?.can_transition_to(OrderStatus::Failed) {
            return Ok(Transition::Unchanged(order));
        }

        {
            use crate::schema::orders::dsl::*;
            diesel::update(orders.filter(id.eq(req_order_id)))
                .set((
                    status.eq(OrderStatus::Failed.as_str()),
                    error_message.eq(message),
                    failed_at.eq(now()),
                    updated_at.eq(now()),
                ))
                .execute(conn)?;
        }

        let reason = format!("Refund for order {req_order_id}: {message}");
        let outcome = ledger::refund_points(conn, &order.user_id, order.id, order.cost, &reason)?;
        if let RefundOutcome::AlreadyRefunded { .. } = outcome {
            warn!(order_id = req_order_id, "failed order had already been refunded");
        }
        info!(order_id = req_order_id, reason = message, balance = outcome.balance(), "order failed and refunded");

        load_order(conn, req_order_id).map(Transition::Applied)
    })
}

/// Administrative refund of `amount` (at most the order cost).
///
/// Moves the order through FAILED to REFUNDED in one transaction. An order
/// whose cost was already returned is a conflict.
pub fn refund_order(
    conn: &mut PgConnection,
    req_order_id: i64,
    amount: i64,
    reason: &str,
) -> Result<(i64, Order), CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let order = lock_order(conn, req_order_id)?;
        if order.refunded_at.is_some() {
            return Err(CoreError::Conflict(format!("order {req_order_id} is already refunded")));
        }
        if amount <= 0 || amount > order.cost {
            return Err(CoreError::BadRequest("amount".to_string()));
        }

        if order.status()? != OrderStatus::Failed {
            use crate::schema::orders::dsl::*;
            diesel::update(orders.filter(id.eq(req_order_id)))
                .set((
                    status.eq(OrderStatus::Failed.as_str()),
                    error_message.eq(reason),
                    failed_at.eq(now()),
                    updated_at.eq(now()),
                ))
                .execute(conn)?;
        }

        let outcome = ledger::refund_points(conn, &order.user_id, order.id, amount, reason)?;
        let balance = match outcome {
            RefundOutcome::Refunded { balance } => balance,
            RefundOutcome::AlreadyRefunded { .. } => {
                return Err(CoreError::Conflict(format!("order {req_order_id} is already refunded")));
            }
        };

        let order = {
            use crate::schema::orders::dsl::*;
            diesel::update(orders.filter(id.eq(req_order_id)))
                .set((status.eq(OrderStatus::Refunded.as_str()), updated_at.eq(now())))
                .get_result::<Order>(conn)?
        };
        info!(order_id = req_order_id, amount, balance, "order refunded by admin");
        Ok((balance, order))
    })
}

pub fn update_download_link(
    conn: &mut PgConnection,
    req_order_id: i64,
    req_download_url: &str,
    req_file_name: Option<&str>,
) -> Result<Order, CoreError> {
    use crate::schema::orders::dsl::*;
    diesel::update(
        orders
            .filter(id.eq(req_order_id))
            .filter(status.eq(OrderStatus::Ready.as_str())),
    )
    .set((
        download_url.eq(req_download_url),
        file_name.eq(req_file_name),
        updated_at.eq(now()),
    ))
    .get_result::<Order>(conn)
    .optional()?
    .ok_or_else(|| CoreError::InvalidState(format!("order {req_order_id} is not ready")))
}

pub fn stale_order_ids(
    conn: &mut PgConnection,
    req_status: OrderStatus,
    cutoff: NaiveDateTime,
    limit: i64,
) -> Result<Vec<i64>, CoreError> {
    use crate::schema::orders::dsl::*;
    orders
        .filter(status.eq(req_status.as_str()))
        .filter(updated_at.lt(cutoff))
        .order(updated_at.asc())
        .select(id)
        .limit(limit)
        .load::<i64>(conn)
        .map_err(Into::into)
}

/// Claims a stale order for one sweep by touching `updated_at`.
///
/// Only one of several overlapping sweeps wins the claim; the others get
/// `None` and skip the order. PENDING claims also count a dispatch attempt.
pub fn claim_stale_order(
    conn: &mut PgConnection,
    req_order_id: i64,
    req_status: OrderStatus,
    cutoff: NaiveDateTime,
) -> Result<Option<Order>, CoreError> {
    use crate::schema::orders::dsl::*;
    let target = orders
        .filter(id.eq(req_order_id))
        .filter(status.eq(req_status.as_str()))
        .filter(updated_at.lt(cutoff));
    let claimed = if req_status == OrderStatus::Pending {
        diesel::update(target)
            .set((dispatch_attempts.eq(dispatch_attempts + 1), updated_at.eq(now())))
            .get_result::<Order>(conn)
            .optional()?
    } else {
        diesel::update(target)
            .set(updated_at.eq(now()))
            .get_result::<Order>(conn)
            .optional()?
    };
    Ok(claimed)
}
