use actix_request_identifier::RequestId;
use actix_web::http::{header, StatusCode};
use actix_web::{get, patch, post, put, web, HttpRequest, HttpResponse};
use bytes::Bytes;
use diesel::{PgConnection, RunQueryDsl};
use tracing::{info, instrument, warn};

use crate::config::Settings;
use crate::database::connect::{with_conn, DbPool};
use crate::database::{approvals, ledger, orders, rollovers, settings};
use crate::domain::{ApprovalStatus, Decision};
use crate::errors::CoreError;
use crate::gate::{self, ExecuteOutcome, GateOutcome, MutationResult, SensitiveMutation};
use crate::permissions::{self, Actor, Permission};
use crate::pipeline::{CallbackOutcome, OrderPipeline};
use crate::proto::{
    AdjustPointsInput, ApprovalList, DecideApprovalInput, DualControlInput, ExecuteResult, GenericOutput,
    GrantRolloverInput, HealthData, HistoryData, ListQuery, OrderList, PendingApproval, ProviderWebhookInput,
    RefundOrderInput, SettingsData, SubmitOrderInput,
};
use crate::provider::ProviderStatus;
use crate::ratelimit::LocalRateLimiter;
use crate::reconcile::Reconciler;
use crate::responses::{self, approval_data, balance_data, history_entry_data, order_data, reply};

type Reply = Result<(StatusCode, GenericOutput), CoreError>;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

fn page_limit(query: &ListQuery) -> i64 {
    query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

async fn authorize(db: &DbPool, req: &HttpRequest, permission: Permission) -> Result<Actor, CoreError> {
    let actor_id = permissions::actor_id(req)?;
    let actor = with_conn(db, move |conn| permissions::load_actor(conn, &actor_id)).await?;
    permissions::require(&actor, permission)?;
    Ok(actor)
}

fn ensure_can_view(actor: &Actor, user_id: &str) -> Result<(), CoreError> {
    if actor.can_view_account(user_id) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!("{} cannot view account {user_id}", actor.id)))
    }
}

// balance after an executed mutation, with the refunded order when there is one
fn executed_output(conn: &mut PgConnection, result: MutationResult) -> Result<GenericOutput, CoreError> {
    match result {
        MutationResult::Balance { user_id, .. } => Ok(GenericOutput {
            balance: Some(balance_data(&ledger::get_balance(conn, &user_id)?)),
            ..Default::default()
        }),
        MutationResult::Refund { order, .. } => Ok(GenericOutput {
            balance: Some(balance_data(&ledger::get_balance(conn, &order.user_id)?)),
            order: Some(order_data(&order)),
            ..Default::default()
        }),
    }
}

fn gate_reply(conn: &mut PgConnection, outcome: GateOutcome) -> Reply {
    match outcome {
        GateOutcome::Executed(result) => Ok((StatusCode::OK, executed_output(conn, result)?)),
        GateOutcome::Pending(request) => Ok((
            StatusCode::ACCEPTED,
            GenericOutput {
                pending: Some(PendingApproval {
                    pending: true,
                    approval_id: request.id,
                }),
                approval: Some(approval_data(&request)),
                ..Default::default()
            },
        )),
    }
}

#[get("/health")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn health_handler(db: web::Data<DbPool>, request_id: RequestId, req: HttpRequest) -> HttpResponse {
    let is_protobuf = responses::is_protobuf(&req);
    let probe = with_conn(&db, |conn| diesel::sql_query("SELECT 1").execute(conn).map_err(CoreError::from)).await;
    let (status, text) = match probe {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            warn!(error = %e, "database probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    let data = GenericOutput {
        health: Some(HealthData { status: text.to_string() }),
        ..Default::default()
    };
    responses::http_response(status, data, is_protobuf)
}

#[get("/points/{user_id}")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn balance_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    user_id: web::Path<String>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::ViewOwnAccount).await?;
        ensure_can_view(&actor, &user_id)?;
        let user_id = user_id.into_inner();
        let balance = with_conn(&db, move |conn| ledger::get_balance(conn, &user_id)).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                balance: Some(balance_data(&balance)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[get("/points/{user_id}/history")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn history_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    user_id: web::Path<String>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::ViewOwnAccount).await?;
        ensure_can_view(&actor, &user_id)?;
        let user_id = user_id.into_inner();
        let limit = page_limit(&query);
        let user_id1 = user_id.clone();
        let entries = with_conn(&db, move |conn| ledger::load_history(conn, &user_id1, limit)).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                history: Some(HistoryData {
                    user_id,
                    entries: entries.iter().map(history_entry_data).collect(),
                }),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[post("/orders")]
#[instrument(skip(db, pipeline, limiter, req), fields(request_id = request_id.as_str()))]
pub async fn submit_order_handler(
    db: web::Data<DbPool>,
    pipeline: web::Data<OrderPipeline>,
    limiter: web::Data<LocalRateLimiter>,
    request_id: RequestId,
    req: HttpRequest,
    input: web::Json<SubmitOrderInput>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::PlaceOrder).await?;
        if !limiter.check(&actor.id) {
            return Err(CoreError::RateLimited);
        }
        let order = pipeline
            .submit_order(&actor.id, &input.provider_id, &input.item_id, &input.url)
            .await?;
        Ok::<_, CoreError>((
            StatusCode::CREATED,
            GenericOutput {
                order: Some(order_data(&order)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[get("/orders")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn list_orders_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::ViewOwnAccount).await?;
        let limit = page_limit(&query);
        let found = with_conn(&db, move |conn| orders::list_orders_for_user(conn, &actor.id, limit)).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                orders: Some(OrderList {
                    orders: found.iter().map(order_data).collect(),
                }),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[get("/orders/{order_id}")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    order_id: web::Path<i64>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::ViewOwnAccount).await?;
        let order_id = order_id.into_inner();
        let order = with_conn(&db, move |conn| orders::load_order(conn, order_id)).await?;
        ensure_can_view(&actor, &order.user_id)?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                order: Some(order_data(&order)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[post("/orders/{order_id}/download-link")]
#[instrument(skip(db, pipeline, req), fields(request_id = request_id.as_str()))]
pub async fn download_link_handler(
    db: web::Data<DbPool>,
    pipeline: web::Data<OrderPipeline>,
    request_id: RequestId,
    req: HttpRequest,
    order_id: web::Path<i64>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::ViewOwnAccount).await?;
        let order_id = order_id.into_inner();
        let order = with_conn(&db, move |conn| orders::load_order(conn, order_id)).await?;
        ensure_can_view(&actor, &order.user_id)?;
        let order = pipeline.regenerate_download_link(order_id).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                order: Some(order_data(&order)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

/// Provider callback. 200 when applied, ignored or duplicated; 404 for an
/// unknown task; 400 for a body that does not parse.
#[post("/webhooks/provider")]
#[instrument(skip(pipeline, req, body), fields(request_id = request_id.as_str()))]
pub async fn provider_webhook_handler(
    pipeline: web::Data<OrderPipeline>,
    request_id: RequestId,
    req: HttpRequest,
    body: Bytes,
) -> HttpResponse {
    let result = async {
        let input: ProviderWebhookInput =
            serde_json::from_slice(&body).map_err(|_| CoreError::BadRequest("payload".to_string()))?;
        if input.task_id.trim().is_empty() {
            return Err(CoreError::BadRequest("task_id".to_string()));
        }
        let status =
            ProviderStatus::from_report(&input.status, input.download_link, input.file_name, input.error_message)?;
        let order = match pipeline.on_provider_callback(&input.task_id, status).await {
            Ok(CallbackOutcome::Applied(order)) | Ok(CallbackOutcome::Ignored(order)) => order,
            Err(CoreError::DuplicateCallback(task_id)) => {
                info!(task_id = task_id.as_str(), "duplicate provider callback absorbed");
                return Ok((StatusCode::OK, GenericOutput::default()));
            }
            Err(CoreError::NotFound(_)) => {
                warn!(task_id = input.task_id.as_str(), "callback for unknown task");
                return Err(CoreError::NotFound("task"));
            }
            Err(e) => return Err(e),
        };
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                order: Some(order_data(&order)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[post("/admin/points/adjust")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn adjust_points_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    input: web::Json<AdjustPointsInput>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::AdjustPoints).await?;
        let input = input.into_inner();
        if input.user_id.trim().is_empty() {
            return Err(CoreError::BadRequest("userId".to_string()));
        }
        if input.amount == 0 {
            return Err(CoreError::BadRequest("amount".to_string()));
        }
        let mutation = SensitiveMutation::PointsAdjust {
            user_id: input.user_id,
            amount: input.amount,
            reason: input.reason,
        };
        with_conn(&db, move |conn| {
            let outcome = gate::submit_gated(conn, &actor.id, mutation)?;
            gate_reply(conn, outcome)
        })
        .await
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[post("/admin/orders/refund")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn refund_order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    input: web::Json<RefundOrderInput>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::RefundOrders).await?;
        let input = input.into_inner();
        let mutation = SensitiveMutation::OrderRefund {
            order_id: input.order_id,
            amount: input.amount,
            reason: input.reason,
        };
        with_conn(&db, move |conn| {
            let outcome = gate::submit_gated(conn, &actor.id, mutation)?;
            gate_reply(conn, outcome)
        })
        .await
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[post("/admin/rollovers")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn grant_rollover_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    input: web::Json<GrantRolloverInput>,
) -> HttpResponse {
    let result = async {
        authorize(&db, &req, Permission::GrantRollovers).await?;
        let input = input.into_inner();
        let balance = with_conn(&db, move |conn| {
            rollovers::grant_rollover(conn, &input.user_id, input.amount, input.expires_at.naive_utc())?;
            ledger::get_balance(conn, &input.user_id)
        })
        .await?;
        Ok::<_, CoreError>((
            StatusCode::CREATED,
            GenericOutput {
                balance: Some(balance_data(&balance)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[get("/admin/approvals")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn list_approvals_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let result = async {
        authorize(&db, &req, Permission::ViewApprovals).await?;
        let status = query.status.as_deref().map(str::parse::<ApprovalStatus>).transpose()?;
        let limit = page_limit(&query);
        let found = with_conn(&db, move |conn| approvals::list_requests(conn, status, limit)).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                approvals: Some(ApprovalList {
                    approvals: found.iter().map(approval_data).collect(),
                }),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[patch("/admin/approvals/{approval_id}")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn decide_approval_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    approval_id: web::Path<i64>,
    input: web::Json<DecideApprovalInput>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::DecideApprovals).await?;
        let decision: Decision = input.action.parse()?;
        let approval_id = approval_id.into_inner();
        let reason = input.into_inner().reason;
        let request =
            with_conn(&db, move |conn| gate::decide(conn, approval_id, decision, &actor.id, reason.as_deref())).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                approval: Some(approval_data(&request)),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

/// 200 with `executed: true` the first time, `executed: false` once the
/// request is already closed; 409 while it is not approved. A mutation that
/// no longer applies closes the request and answers with its own error.
#[post("/admin/approvals/{approval_id}/execute")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn execute_approval_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    approval_id: web::Path<i64>,
) -> HttpResponse {
    let result = async {
        authorize(&db, &req, Permission::ExecuteApprovals).await?;
        let approval_id = approval_id.into_inner();
        let execution = with_conn(&db, move |conn| match gate::execute(conn, approval_id)? {
            ExecuteOutcome::Executed { approval, result } => {
                let output = executed_output(conn, result)?;
                Ok(ExecuteResult {
                    executed: true,
                    approval: Some(approval_data(&approval)),
                    balance: output.balance,
                    order: output.order,
                })
            }
            ExecuteOutcome::AlreadyExecuted(approval) => Ok(ExecuteResult {
                executed: false,
                approval: Some(approval_data(&approval)),
                ..Default::default()
            }),
            ExecuteOutcome::Failed { cause, .. } => Err(cause),
        })
        .await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                execution: Some(execution),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[get("/admin/settings/dual-control")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn dual_control_handler(db: web::Data<DbPool>, request_id: RequestId, req: HttpRequest) -> HttpResponse {
    let result = async {
        authorize(&db, &req, Permission::ViewApprovals).await?;
        let enabled = with_conn(&db, settings::is_dual_control_enabled).await?;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                settings: Some(SettingsData {
                    dual_control_enabled: enabled,
                }),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

#[put("/admin/settings/dual-control")]
#[instrument(skip(db, req), fields(request_id = request_id.as_str()))]
pub async fn set_dual_control_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    req: HttpRequest,
    input: web::Json<DualControlInput>,
) -> HttpResponse {
    let result = async {
        let actor = authorize(&db, &req, Permission::ManageSettings).await?;
        let enabled = input.enabled;
        with_conn(&db, move |conn| settings::set_dual_control_enabled(conn, enabled)).await?;
        info!(actor_id = actor.id.as_str(), enabled, "dual control toggled");
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                settings: Some(SettingsData {
                    dual_control_enabled: enabled,
                }),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

// an empty configured token disables the trigger
fn scheduler_authorized(req: &HttpRequest, token: &str) -> bool {
    !token.is_empty() && bearer_token(req) == Some(token)
}

#[post("/internal/reconcile")]
#[instrument(skip(reconciler, config, req), fields(request_id = request_id.as_str()))]
pub async fn reconcile_handler(
    reconciler: web::Data<Reconciler>,
    config: web::Data<Settings>,
    request_id: RequestId,
    req: HttpRequest,
) -> HttpResponse {
    let result = async {
        if !scheduler_authorized(&req, &config.scheduler_token) {
            return Err(CoreError::Unauthorized);
        }
        let report = reconciler.run().await;
        Ok::<_, CoreError>((
            StatusCode::OK,
            GenericOutput {
                reconcile: Some(report.into()),
                ..Default::default()
            },
        ))
    }
    .await;
    reply(result, responses::is_protobuf(&req))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_handler)
        .service(balance_handler)
        .service(history_handler)
        .service(submit_order_handler)
        .service(list_orders_handler)
        .service(order_handler)
        .service(download_link_handler)
        .service(provider_webhook_handler)
        .service(adjust_points_handler)
        .service(refund_order_handler)
        .service(grant_rollover_handler)
        .service(list_approvals_handler)
        .service(decide_approval_handler)
        .service(execute_approval_handler)
        .service(dual_control_handler)
        .service(set_dual_control_handler)
        .service(reconcile_handler);
}
