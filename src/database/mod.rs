use chrono::NaiveDateTime;

pub mod approvals;
pub mod catalog;
pub mod connect;
pub mod idgen;
pub mod ledger;
pub mod models;
pub mod orders;
pub mod rollovers;
pub mod settings;
#[cfg(test)]
pub mod testing;
pub mod users;

// all timestamps are stored as naive utc
pub fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}
