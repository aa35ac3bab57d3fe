use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models;
use crate::errors::CoreError;

// resolves the point cost of one asset from the given stock site
pub fn resolve_cost(conn: &mut PgConnection, req_site_id: &str) -> Result<i64, CoreError> {
    use crate::schema::stock_site::dsl::*;
    let site = stock_site
        .filter(id.eq(req_site_id))
        .first::<models::StockSite>(conn)
        .optional()?
        .ok_or(CoreError::NotFound("stock site"))?;
    if !site.active {
        return Err(CoreError::InvalidState(format!("stock site {} is not available", site.id)));
    }
    Ok(site.cost_points)
}
