use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::domain::{ApprovalKind, ApprovalStatus, OrderStatus};
use crate::errors::CoreError;

#[derive(Queryable, Debug, Clone)]
pub struct User {
    pub id: String,
    pub role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone)]
pub struct StockSite {
    pub id: String,
    pub name: String,
    pub cost_points: i64,
    pub active: bool,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct PointsBalance {
    pub user_id: String,
    pub current_points: i64,
    pub total_purchased: i64,
    pub total_used: i64,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone)]
pub struct PointsHistoryEntry {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub amount: i64,
    pub description: String,
    pub order_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::points_history)]
pub struct NewPointsHistoryEntry<'a> {
    pub id: i64,
    pub user_id: &'a str,
    pub kind: &'a str,
    pub amount: i64,
    pub description: &'a str,
    pub order_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone)]
pub struct RolloverRecord {
    pub id: i64,
    pub user_id: String,
    pub amount: i64,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::rollover_record)]
pub struct NewRolloverRecord<'a> {
    pub id: i64,
    pub user_id: &'a str,
    pub amount: i64,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub user_id: String,
    pub stock_site_id: String,
    pub stock_item_id: String,
    pub source_url: String,
    pub cost: i64,
    pub status: String,
    pub task_id: Option<String>,
    pub download_url: Option<String>,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
    pub dispatch_attempts: i32,
    pub failed_at: Option<NaiveDateTime>,
    pub refunded_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, CoreError> {
        self.status.parse()
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder<'a> {
    pub id: i64,
    pub user_id: &'a str,
    pub stock_site_id: &'a str,
    pub stock_item_id: &'a str,
    pub source_url: &'a str,
    pub cost: i64,
    pub status: &'a str,
    pub dispatch_attempts: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone)]
pub struct ApprovalRequest {
    pub id: i64,
    pub kind: String,
    pub resource_type: String,
    pub resource_id: String,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub requested_by_id: String,
    pub approved_by_id: Option<String>,
    pub decision_reason: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub decided_at: Option<NaiveDateTime>,
    pub executed_at: Option<NaiveDateTime>,
}

impl ApprovalRequest {
    pub fn kind(&self) -> Result<ApprovalKind, CoreError> {
        self.kind.parse()
    }

    pub fn status(&self) -> Result<ApprovalStatus, CoreError> {
        self.status.parse()
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::approval_request)]
pub struct NewApprovalRequest<'a> {
    pub id: i64,
    pub kind: &'a str,
    pub resource_type: &'a str,
    pub resource_id: &'a str,
    pub amount: Option<i64>,
    pub reason: Option<&'a str>,
    pub requested_by_id: &'a str,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
}
