use std::env;

use diesel::{ExpressionMethods, PgConnection, RunQueryDsl};
use once_cell::sync::OnceCell;

use crate::database::connect::{create_db_connection_pool, run_migrations, DbPool};
use crate::database::idgen;

static POOL: OnceCell<Option<DbPool>> = OnceCell::new();

// database-backed tests return early when DATABASE_URL is not configured
pub fn test_pool() -> Option<DbPool> {
    POOL.get_or_init(|| {
        dotenvy::dotenv().ok();
        let url = env::var("DATABASE_URL").ok()?;
        let pool = create_db_connection_pool(&url).ok()?;
        run_migrations(&pool).ok()?;
        Some(pool)
    })
    .clone()
}

pub fn create_user(conn: &mut PgConnection, user_role: &str) -> String {
    use crate::schema::users::dsl::*;
    let user_id = format!("{user_role}-{}", idgen::next());
    diesel::insert_into(users)
        .values((id.eq(&user_id), role.eq(user_role)))
        .execute(conn)
        .unwrap();
    user_id
}

pub fn create_site(conn: &mut PgConnection, cost: i64) -> String {
    use crate::schema::stock_site::dsl::*;
    let site_id = format!("site-{}", idgen::next());
    diesel::insert_into(stock_site)
        .values((id.eq(&site_id), name.eq("Test Stock"), cost_points.eq(cost), active.eq(true)))
        .execute(conn)
        .unwrap();
    site_id
}
