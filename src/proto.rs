//! Wire messages. Every response is a [`GenericOutput`], encoded as JSON or,
//! when the client accepts `application/x-protobuf`, as protobuf.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericOutput {
    #[prost(message, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<BalanceData>,
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryData>,
    #[prost(message, optional, tag = "3")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderData>,
    #[prost(message, optional, tag = "4")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<OrderList>,
    #[prost(message, optional, tag = "5")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalData>,
    #[prost(message, optional, tag = "6")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvals: Option<ApprovalList>,
    #[prost(message, optional, tag = "7")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingApproval>,
    #[prost(message, optional, tag = "8")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecuteResult>,
    #[prost(message, optional, tag = "9")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileData>,
    #[prost(message, optional, tag = "10")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsData>,
    #[prost(message, optional, tag = "11")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthData>,
    #[prost(message, optional, tag = "15")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceData {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(int64, tag = "2")]
    pub current_points: i64,
    #[prost(int64, tag = "3")]
    pub total_purchased: i64,
    #[prost(int64, tag = "4")]
    pub total_used: i64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryData {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(int64, tag = "3")]
    pub amount: i64,
    #[prost(string, tag = "4")]
    pub description: String,
    #[prost(int64, optional, tag = "5")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[prost(string, tag = "6")]
    pub created_at: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryData {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<HistoryEntryData>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(string, tag = "3")]
    pub stock_site_id: String,
    #[prost(string, tag = "4")]
    pub stock_item_id: String,
    #[prost(int64, tag = "5")]
    pub cost: i64,
    #[prost(string, tag = "6")]
    pub status: String,
    #[prost(string, optional, tag = "7")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[prost(string, optional, tag = "8")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[prost(string, optional, tag = "9")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[prost(string, optional, tag = "10")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[prost(bool, tag = "11")]
    pub refunded: bool,
    #[prost(string, tag = "12")]
    pub created_at: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderList {
    #[prost(message, repeated, tag = "1")]
    pub orders: Vec<OrderData>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalData {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(string, tag = "3")]
    pub resource_type: String,
    #[prost(string, tag = "4")]
    pub resource_id: String,
    #[prost(int64, optional, tag = "5")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[prost(string, optional, tag = "6")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[prost(string, tag = "7")]
    pub requested_by_id: String,
    #[prost(string, optional, tag = "8")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by_id: Option<String>,
    #[prost(string, optional, tag = "9")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    #[prost(string, tag = "10")]
    pub status: String,
    #[prost(string, tag = "11")]
    pub created_at: String,
    #[prost(string, optional, tag = "12")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalList {
    #[prost(message, repeated, tag = "1")]
    pub approvals: Vec<ApprovalData>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    #[prost(bool, tag = "1")]
    pub pending: bool,
    #[prost(int64, tag = "2")]
    pub approval_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    #[prost(bool, tag = "1")]
    pub executed: bool,
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalData>,
    #[prost(message, optional, tag = "3")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<BalanceData>,
    #[prost(message, optional, tag = "4")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderData>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileData {
    #[prost(uint32, tag = "1")]
    pub pending_redispatched: u32,
    #[prost(uint32, tag = "2")]
    pub pending_failed: u32,
    #[prost(uint32, tag = "3")]
    pub processing_polled: u32,
    #[prost(uint32, tag = "4")]
    pub processing_resolved: u32,
    #[prost(uint32, tag = "5")]
    pub processing_expired: u32,
    #[prost(uint32, tag = "6")]
    pub rollovers_expired: u32,
    #[prost(uint32, tag = "7")]
    pub errors: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsData {
    #[prost(bool, tag = "1")]
    pub dual_control_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    #[prost(string, tag = "1")]
    pub status: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    #[prost(oneof = "error::OneError", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10")]
    pub one_error: Option<error::OneError>,
}

pub mod error {
    use serde::Serialize;

    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub enum OneError {
        #[prost(message, tag = "1")]
        BadParameter(super::BadParameterError),
        #[prost(message, tag = "2")]
        NotFound(super::NotFoundError),
        #[prost(message, tag = "3")]
        InsufficientBalance(super::InsufficientBalanceError),
        #[prost(message, tag = "4")]
        Unauthorized(super::MessageError),
        #[prost(message, tag = "5")]
        Forbidden(super::MessageError),
        #[prost(message, tag = "6")]
        InvalidState(super::MessageError),
        #[prost(message, tag = "7")]
        Conflict(super::MessageError),
        #[prost(message, tag = "8")]
        ProviderUnavailable(super::MessageError),
        #[prost(message, tag = "9")]
        RateLimited(super::MessageError),
        #[prost(message, tag = "10")]
        Internal(super::MessageError),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadParameterError {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundError {
    #[prost(string, tag = "1")]
    pub resource: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientBalanceError {
    #[prost(int64, tag = "1")]
    pub required: i64,
    #[prost(int64, tag = "2")]
    pub available: i64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    #[prost(string, tag = "1")]
    pub message: String,
}

// inputs

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderInput {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPointsInput {
    pub user_id: String,
    pub amount: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOrderInput {
    pub order_id: i64,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRolloverInput {
    pub user_id: String,
    pub amount: i64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideApprovalInput {
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualControlInput {
    pub enabled: bool,
}

/// Provider callback body. The provider sends snake_case keys.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderWebhookInput {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub download_link: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}
