use actix_web::http::{header, StatusCode};
use actix_web::{HttpRequest, HttpResponse};
use chrono::NaiveDateTime;
use prost::Message;
use tracing::error;

use crate::database::models::{ApprovalRequest, Order, PointsBalance, PointsHistoryEntry};
use crate::errors::CoreError;
use crate::proto::{
    error, ApprovalData, BadParameterError, BalanceData, Error, GenericOutput, HistoryEntryData,
    InsufficientBalanceError, MessageError, NotFoundError, OrderData, ReconcileData,
};
use crate::reconcile::ReconcileReport;

const PROTOBUF: &str = "application/x-protobuf";

pub fn is_protobuf(req: &HttpRequest) -> bool {
    req.headers()
        .get_all(header::ACCEPT)
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|part| part.trim().starts_with(PROTOBUF)))
}

pub fn http_response(status: StatusCode, data: GenericOutput, is_protobuf: bool) -> HttpResponse {
    if is_protobuf {
        return HttpResponse::build(status).content_type(PROTOBUF).body(data.encode_to_vec());
    }
    match serde_json::to_string(&data) {
        Ok(body) => HttpResponse::build(status).content_type("application/json").body(body),
        Err(e) => {
            error!("{e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

pub fn reply(result: Result<(StatusCode, GenericOutput), CoreError>, is_protobuf: bool) -> HttpResponse {
    match result {
        Ok((status, data)) => http_response(status, data, is_protobuf),
        Err(e) => error_http_response(&e, is_protobuf),
    }
}

fn message(text: impl Into<String>) -> MessageError {
    MessageError { message: text.into() }
}

pub fn error_http_response(err: &CoreError, is_protobuf: bool) -> HttpResponse {
    use error::OneError;

    let one_error = match err {
        CoreError::DuplicateCallback(_) => return http_response(StatusCode::OK, GenericOutput::default(), is_protobuf),
        CoreError::BadRequest(name) => OneError::BadParameter(BadParameterError { name: name.clone() }),
        CoreError::NotFound(resource) => OneError::NotFound(NotFoundError {
            resource: resource.to_string(),
        }),
        CoreError::InsufficientBalance { required, available } => {
            OneError::InsufficientBalance(InsufficientBalanceError {
                required: *required,
                available: *available,
            })
        }
        CoreError::Unauthorized => OneError::Unauthorized(message(err.to_string())),
        CoreError::Forbidden(_) => OneError::Forbidden(message(err.to_string())),
        CoreError::InvalidState(_) => OneError::InvalidState(message(err.to_string())),
        CoreError::Conflict(_) => OneError::Conflict(message(err.to_string())),
        CoreError::ProviderUnavailable(_) => OneError::ProviderUnavailable(message(err.to_string())),
        CoreError::RateLimited => OneError::RateLimited(message(err.to_string())),
        CoreError::Database(_) | CoreError::Pool(_) | CoreError::Internal(_) => {
            error!(error = %err, "request failed");
            OneError::Internal(message("internal error"))
        }
    };
    let data = GenericOutput {
        error: Some(Error {
            one_error: Some(one_error),
        }),
        ..Default::default()
    };
    http_response(err.status_code(), data, is_protobuf)
}

pub fn timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn balance_data(balance: &PointsBalance) -> BalanceData {
    BalanceData {
        user_id: balance.user_id.clone(),
        current_points: balance.current_points,
        total_purchased: balance.total_purchased,
        total_used: balance.total_used,
    }
}

pub fn history_entry_data(entry: &PointsHistoryEntry) -> HistoryEntryData {
    HistoryEntryData {
        id: entry.id,
        kind: entry.kind.clone(),
        amount: entry.amount,
        description: entry.description.clone(),
        order_id: entry.order_id,
        created_at: timestamp(entry.created_at),
    }
}

pub fn order_data(order: &Order) -> OrderData {
    OrderData {
        id: order.id,
        user_id: order.user_id.clone(),
        stock_site_id: order.stock_site_id.clone(),
        stock_item_id: order.stock_item_id.clone(),
        cost: order.cost,
        status: order.status.clone(),
        task_id: order.task_id.clone(),
        download_url: order.download_url.clone(),
        file_name: order.file_name.clone(),
        error_message: order.error_message.clone(),
        refunded: order.refunded_at.is_some(),
        created_at: timestamp(order.created_at),
    }
}

pub fn approval_data(request: &ApprovalRequest) -> ApprovalData {
    ApprovalData {
        id: request.id,
        kind: request.kind.clone(),
        resource_type: request.resource_type.clone(),
        resource_id: request.resource_id.clone(),
        amount: request.amount,
        reason: request.reason.clone(),
        requested_by_id: request.requested_by_id.clone(),
        approved_by_id: request.approved_by_id.clone(),
        decision_reason: request.decision_reason.clone(),
        status: request.status.clone(),
        created_at: timestamp(request.created_at),
        executed_at: request.executed_at.map(timestamp),
    }
}

impl From<ReconcileReport> for ReconcileData {
    fn from(report: ReconcileReport) -> Self {
        ReconcileData {
            pending_redispatched: report.pending_redispatched,
            pending_failed: report.pending_failed,
            processing_polled: report.processing_polled,
            processing_resolved: report.processing_resolved,
            processing_expired: report.processing_expired,
            rollovers_expired: report.rollovers_expired,
            errors: report.errors,
        }
    }
}
