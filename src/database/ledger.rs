use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::info;

use crate::database::models::{NewPointsHistoryEntry, PointsBalance, PointsHistoryEntry};
use crate::database::{idgen, now};
use crate::domain::HistoryKind;
use crate::errors::CoreError;

#[derive(Debug, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { balance: i64 },
    AlreadyRefunded { balance: i64 },
}

impl RefundOutcome {
    pub fn balance(&self) -> i64 {
        match self {
            RefundOutcome::Refunded { balance } | RefundOutcome::AlreadyRefunded { balance } => *balance,
        }
    }
}

// creates new balance record, on conflict does nothing
fn init_user_balance(conn: &mut PgConnection, req_user_id: &str) -> Result<bool, CoreError> {
    use crate::schema::points_balance::dsl::*;
    diesel::insert_into(points_balance)
        .values((user_id.eq(req_user_id), updated_at.eq(now())))
        .on_conflict(user_id)
        .do_nothing()
        .execute(conn)
        .map(|res| res > 0)
        .map_err(Into::into)
}

// load user balance record and lock for update
fn lock_balance(conn: &mut PgConnection, req_user_id: &str) -> Result<Option<PointsBalance>, CoreError> {
    use crate::schema::points_balance::dsl::*;
    points_balance
        .filter(user_id.eq(req_user_id))
        .for_update()
        .first::<PointsBalance>(conn)
        .optional()
        .map_err(Into::into)
}

fn append_history(
    conn: &mut PgConnection,
    req_user_id: &str,
    kind: HistoryKind,
    amount: i64,
    description: &str,
    order_id: Option<i64>,
) -> Result<i64, CoreError> {
    let entry_id = idgen::next();
    let entry = NewPointsHistoryEntry {
        id: entry_id,
        user_id: req_user_id,
        kind: kind.as_str(),
        amount,
        description,
        order_id,
        created_at: now(),
    };
    diesel::insert_into(crate::schema::points_history::table)
        .values(&entry)
        .execute(conn)?;
    Ok(entry_id)
}

/// Returns the balance row. Reads never create one; the first credit does.
pub fn get_balance(conn: &mut PgConnection, req_user_id: &str) -> Result<PointsBalance, CoreError> {
    use crate::schema::points_balance::dsl::*;
    points_balance
        .filter(user_id.eq(req_user_id))
        .first::<PointsBalance>(conn)
        .optional()?
        .ok_or(CoreError::NotFound("balance"))
}

pub fn add_points(
    conn: &mut PgConnection,
    req_user_id: &str,
    amount: i64,
    kind: HistoryKind,
    description: &str,
) -> Result<i64, CoreError> {
    credit(conn, req_user_id, amount, kind, description, None)
}

pub(crate) fn credit(
    conn: &mut PgConnection,
    req_user_id: &str,
    amount: i64,
    kind: HistoryKind,
    description: &str,
    order_id: Option<i64>,
) -> Result<i64, CoreError> {
    if amount <= 0 {
        return Err(CoreError::BadRequest("amount".to_string()));
    }

    conn.transaction::<_, CoreError, _>(|conn| {
        init_user_balance(conn, req_user_id)?;
        let balance = lock_balance(conn, req_user_id)?.ok_or(CoreError::NotFound("balance"))?;

        let balance_after = balance
            .current_points
            .checked_add(amount)
            .ok_or_else(|| CoreError::BadRequest("amount".to_string()))?;
        let purchased_after = if kind.counts_as_purchase() {
            balance.total_purchased + amount
        } else {
            balance.total_purchased
        };

        {
            use crate::schema::points_balance::dsl::*;
            diesel::update(points_balance.filter(user_id.eq(req_user_id)))
                .set((
                    current_points.eq(balance_after),
                    total_purchased.eq(purchased_after),
                    updated_at.eq(now()),
                ))
                .execute(conn)?;
        }
        append_history(conn, req_user_id, kind, amount, description, order_id)?;

        info!(user_id = req_user_id, amount, kind = kind.as_str(), balance_after, "points credited");
        Ok(balance_after)
    })
}

pub fn deduct_points(
    conn: &mut PgConnection,
    req_user_id: &str,
    amount: i64,
    kind: HistoryKind,
    description: &str,
) -> Result<i64, CoreError> {
    debit(conn, req_user_id, amount, kind, description, None)
}

// the balance check and the decrement happen under the same row lock
pub(crate) fn debit(
    conn: &mut PgConnection,
    req_user_id: &str,
    amount: i64,
    kind: HistoryKind,
    description: &str,
    order_id: Option<i64>,
) -> Result<i64, CoreError> {
    if amount <= 0 {
        return Err(CoreError::BadRequest("amount".to_string()));
    }

    conn.transaction::<_, CoreError, _>(|conn| {
        let balance = lock_balance(conn, req_user_id)?;
        let available = balance.as_ref().map(|b| b.current_points).unwrap_or(0);
        let balance = match balance {
            Some(balance) if balance.current_points >= amount => balance,
            _ => {
                return Err(CoreError::InsufficientBalance {
                    required: amount,
                    available,
                })
            }
        };

        let balance_after = balance.current_points - amount;
        {
            use crate::schema::points_balance::dsl::*;
            diesel::update(points_balance.filter(user_id.eq(req_user_id)))
                .set((
                    current_points.eq(balance_after),
                    total_used.eq(balance.total_used + amount),
                    updated_at.eq(now()),
                ))
                .execute(conn)?;
        }
        append_history(conn, req_user_id, kind, -amount, description, order_id)?;

        info!(user_id = req_user_id, amount, kind = kind.as_str(), balance_after, "points debited");
        Ok(balance_after)
    })
}

/// Credits `amount` back for an order, at most once per order.
///
/// The order row carries the marker: `refunded_at` is claimed with a guarded
/// update in the same transaction as the credit, so a second call sees the
/// marker and returns [`RefundOutcome::AlreadyRefunded`] without touching the
/// balance. The partial unique index on refund history rows backs this up.
pub fn refund_points(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_order_id: i64,
    amount: i64,
    reason: &str,
) -> Result<RefundOutcome, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let claimed = {
            use crate::schema::orders::dsl::*;
            diesel::update(
                orders
                    .filter(id.eq(req_order_id))
                    .filter(user_id.eq(req_user_id))
                    .filter(refunded_at.is_null()),
            )
            .set((refunded_at.eq(now()), updated_at.eq(now())))
            .execute(conn)?
        };

        if claimed == 0 {
            let exists = {
                use crate::schema::orders::dsl::*;
                orders
                    .filter(id.eq(req_order_id))
                    .filter(user_id.eq(req_user_id))
                    .select(id)
                    .first::<i64>(conn)
                    .optional()?
            };
            if exists.is_none() {
                return Err(CoreError::NotFound("order"));
            }
            let balance = get_balance(conn, req_user_id)?.current_points;
            info!(user_id = req_user_id, order_id = req_order_id, "order already refunded");
            return Ok(RefundOutcome::AlreadyRefunded { balance });
        }

        let balance = credit(conn, req_user_id, amount, HistoryKind::Refund, reason, Some(req_order_id))?;
        Ok(RefundOutcome::Refunded { balance })
    })
}

// newest first
pub fn load_history(conn: &mut PgConnection, req_user_id: &str, limit: i64) -> Result<Vec<PointsHistoryEntry>, CoreError> {
    use crate::schema::points_history::dsl::*;
    points_history
        .filter(user_id.eq(req_user_id))
        .order((created_at.desc(), id.desc()))
        .limit(limit)
        .load::<PointsHistoryEntry>(conn)
        .map_err(Into::into)
}

#[cfg(test)]
pub(crate) fn history_total(conn: &mut PgConnection, req_user_id: &str) -> i64 {
    use crate::schema::points_history::dsl::*;
    points_history
        .filter(user_id.eq(req_user_id))
        .select(amount)
        .load::<i64>(conn)
        .unwrap()
        .into_iter()
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::orders;
    use crate::database::testing;
    use std::thread;

    #[test]
    fn test_add_and_deduct() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let user = testing::create_user(conn, "user");
            assert!(matches!(get_balance(conn, &user), Err(CoreError::NotFound(_))));

            assert_eq!(add_points(conn, &user, 100, HistoryKind::Purchase, "starter pack")?, 100);
            assert_eq!(deduct_points(conn, &user, 30, HistoryKind::Usage, "asset")?, 70);

            let balance = get_balance(conn, &user)?;
            assert_eq!(balance.current_points, 70);
            assert_eq!(balance.total_purchased, 100);
            assert_eq!(balance.total_used, 30);
            assert_eq!(history_total(conn, &user), 70);

            let history = load_history(conn, &user, 10)?;
            assert_eq!(history.len(), 2);
            assert!(history.iter().any(|e| e.kind == "USAGE" && e.amount == -30));
            Ok(())
        });
    }

    #[test]
    fn test_deduct_beyond_balance() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let user = testing::create_user(conn, "user");
            let err = deduct_points(conn, &user, 5, HistoryKind::Usage, "asset").unwrap_err();
            assert!(matches!(err, CoreError::InsufficientBalance { required: 5, available: 0 }));

            add_points(conn, &user, 4, HistoryKind::Purchase, "top up")?;
            let err = deduct_points(conn, &user, 5, HistoryKind::Usage, "asset").unwrap_err();
            assert!(matches!(err, CoreError::InsufficientBalance { required: 5, available: 4 }));
            assert_eq!(get_balance(conn, &user)?.current_points, 4);
            assert!(matches!(
                add_points(conn, &user, 0, HistoryKind::Purchase, "zero"),
                Err(CoreError::BadRequest(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_refund_is_applied_once() {
        let Some(pool) = testing::test_pool() else { return };
        pool.get().unwrap().test_transaction::<_, CoreError, _>(|conn| {
            let user = testing::create_user(conn, "user");
            let site = testing::create_site(conn, 10);
            add_points(conn, &user, 100, HistoryKind::Purchase, "top up")?;
            let order = orders::create_order(conn, &user, &site, "item-1", "https://stock.test/item-1")?;
            assert_eq!(get_balance(conn, &user)?.current_points, 90);

            let first = refund_points(conn, &user, order.id, order.cost, "provider failed")?;
            assert_eq!(first, RefundOutcome::Refunded { balance: 100 });
            let second = refund_points(conn, &user, order.id, order.cost, "provider failed")?;
            assert_eq!(second, RefundOutcome::AlreadyRefunded { balance: 100 });
            assert_eq!(history_total(conn, &user), 100);

            assert!(matches!(
                refund_points(conn, &user, -1, 10, "nope"),
                Err(CoreError::NotFound("order"))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let Some(pool) = testing::test_pool() else { return };
        let user = {
            let mut conn = pool.get().unwrap();
            let user = testing::create_user(&mut conn, "user");
            add_points(&mut conn, &user, 100, HistoryKind::Purchase, "top up").unwrap();
            user
        };

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                let user = user.clone();
                thread::spawn(move || {
                    let mut conn = pool.get().unwrap();
                    deduct_points(&mut conn, &user, 10, HistoryKind::Usage, "asset").is_ok()
                })
            })
            .collect();
        let succeeded = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(succeeded, 10);

        let mut conn = pool.get().unwrap();
        let balance = get_balance(&mut conn, &user).unwrap();
        assert_eq!(balance.current_points, 0);
        assert_eq!(balance.total_used, 100);
        assert_eq!(history_total(&mut conn, &user), 0);
    }
}
