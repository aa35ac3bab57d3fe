use chrono::NaiveDateTime;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::info;

use crate::database::models::{NewRolloverRecord, PointsBalance, RolloverRecord};
use crate::database::{idgen, ledger, now};
use crate::domain::HistoryKind;
use crate::errors::CoreError;

/// Credits bonus points and records the rollover that will take them back.
pub fn grant_rollover(
    conn: &mut PgConnection,
    req_user_id: &str,
    amount: i64,
    expires_at: NaiveDateTime,
) -> Result<RolloverRecord, CoreError> {
    if amount <= 0 {
        return Err(CoreError::BadRequest("amount".to_string()));
    }
    conn.transaction::<_, CoreError, _>(|conn| {
        let description = format!("Rollover bonus, expires {}", expires_at.format("%Y-%m-%d %H:%M"));
        ledger::add_points(conn, req_user_id, amount, HistoryKind::Purchase, &description)?;
        let record = diesel::insert_into(crate::schema::rollover_record::table)
            .values(&NewRolloverRecord {
                id: idgen::next(),
                user_id: req_user_id,
                amount,
                expires_at,
                created_at: now(),
            })
            .get_result::<RolloverRecord>(conn)?;
        info!(user_id = req_user_id, amount, rollover_id = record.id, "rollover granted");
        Ok(record)
    })
}

pub fn expired_rollover_ids(conn: &mut PgConnection, at: NaiveDateTime, limit: i64) -> Result<Vec<i64>, CoreError> {
    use crate::schema::rollover_record::dsl::*;
    rollover_record
        .filter(expires_at.le(at))
        .order(expires_at.asc())
        .select(id)
        .limit(limit)
        .load::<i64>(conn)
        .map_err(Into::into)
}

/// Expires one rollover record. Returns the points removed, or `None` when a
/// concurrent sweep already took the record.
///
/// The delete is the claim: whichever sweep deletes the row writes the
/// ROLLOVER_EXPIRED entry, in the same transaction. The debit is capped at the
/// current balance, since the bonus points may already have been spent.
pub fn expire_rollover(conn: &mut PgConnection, req_rollover_id: i64) -> Result<Option<i64>, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let record = {
            use crate::schema::rollover_record::dsl::*;
            diesel::delete(rollover_record.filter(id.eq(req_rollover_id)))
                .get_result::<RolloverRecord>(conn)
                .optional()?
        };
        let record = match record {
            Some(record) => record,
            None => return Ok(None),
        };

        let balance = {
            use crate::schema::points_balance::dsl::*;
            points_balance
                .filter(user_id.eq(&record.user_id))
                .for_update()
                .first::<PointsBalance>(conn)
                .optional()?
        };
        let available = balance.map(|b| b.current_points).unwrap_or(0);
        let removed = record.amount.min(available);
        if removed > 0 {
            let description = format!("Rollover of {} points expired", record.amount);
            ledger::debit(conn, &record.user_id, removed, HistoryKind::RolloverExpired, &description, None)?;
        }
        info!(user_id = record.user_id.as_str(), rollover_id = record.id, removed, "rollover expired");
        Ok(Some(removed))
    })
}
