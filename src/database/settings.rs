use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::now;
use crate::errors::CoreError;

pub const DUAL_CONTROL_ENABLED: &str = "dual_control_enabled";

// absent or anything other than "true" means sensitive mutations run immediately
pub fn is_dual_control_enabled(conn: &mut PgConnection) -> Result<bool, CoreError> {
    use crate::schema::app_setting::dsl::*;
    let setting = app_setting
        .filter(name.eq(DUAL_CONTROL_ENABLED))
        .select(value)
        .first::<String>(conn)
        .optional()?;
    Ok(setting.map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false))
}

pub fn set_dual_control_enabled(conn: &mut PgConnection, enabled: bool) -> Result<(), CoreError> {
    use crate::schema::app_setting::dsl::*;
    let new_value = if enabled { "true" } else { "false" };
    diesel::insert_into(app_setting)
        .values((name.eq(DUAL_CONTROL_ENABLED), value.eq(new_value), updated_at.eq(now())))
        .on_conflict(name)
        .do_update()
        .set((value.eq(new_value), updated_at.eq(now())))
        .execute(conn)?;
    Ok(())
}
