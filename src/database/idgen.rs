//! Snowflake ids for every table whose key is generated in the service
//! rather than by Postgres. Worker bits are picked at random per process.

use snowflake::SnowflakeIdGenerator;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

const SNOWFLAKE_EPOCH: u64 = 1669205840566;

static GENERATOR: once_cell::sync::OnceCell<Mutex<SnowflakeIdGenerator>> = once_cell::sync::OnceCell::new();

fn new() -> Mutex<SnowflakeIdGenerator> {
    let epoch = UNIX_EPOCH + Duration::from_millis(SNOWFLAKE_EPOCH);
    let machine_id = fastrand::i32(0..32);
    let node_id = fastrand::i32(0..32);
    Mutex::new(SnowflakeIdGenerator::with_epoch(machine_id, node_id, epoch))
}

/// Next id for history, order, rollover and approval rows.
pub fn next() -> i64 {
    let mut generator = GENERATOR.get_or_init(new).lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    generator.generate()
}
