use actix_web::web;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::errors::CoreError;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

// create database connection pool with the database url using diesel
pub fn create_db_connection_pool(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().test_on_check_out(true).build(manager)
}

// run diesel migrations
pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    pool.get()?
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;
    Ok(())
}

// checks out a connection and runs blocking diesel work on the actix blocking pool
pub async fn with_conn<F, T>(pool: &DbPool, f: F) -> Result<T, CoreError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    web::block(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}
