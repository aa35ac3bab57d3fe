use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{error, info, instrument, warn};

use crate::config::ReconcileSettings;
use crate::database::connect::with_conn;
use crate::database::{now, orders, rollovers};
use crate::domain::OrderStatus;
use crate::errors::CoreError;
use crate::pipeline::{apply_provider_status, CallbackOutcome, OrderPipeline};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub pending_redispatched: u32,
    pub pending_failed: u32,
    pub processing_polled: u32,
    pub processing_resolved: u32,
    pub processing_expired: u32,
    pub rollovers_expired: u32,
    pub errors: u32,
}

// a window reaching past the representable range selects nothing
fn before_now(duration: Duration) -> NaiveDateTime {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|window| now().checked_sub_signed(window))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Periodic sweeps over stuck orders and expired rollovers.
///
/// Each item is claimed through a guarded update before it is worked on, so
/// overlapping runs skip what another run already took.
#[derive(Clone)]
pub struct Reconciler {
    pipeline: OrderPipeline,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(pipeline: OrderPipeline, settings: ReconcileSettings) -> Self {
        Self { pipeline, settings }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.sweep_pending(&mut report).await;
        self.sweep_processing(&mut report).await;
        self.sweep_rollovers(&mut report).await;
        info!(?report, "reconciliation finished");
        report
    }

    async fn sweep_pending(&self, report: &mut ReconcileReport) {
        let cutoff = before_now(self.settings.pending_timeout);
        let batch = self.settings.batch_size;
        let ids = with_conn(self.pipeline.pool(), move |conn| {
            orders::stale_order_ids(conn, OrderStatus::Pending, cutoff, batch)
        })
        .await;
        let ids = match ids {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list pending orders");
                report.errors += 1;
                return;
            }
        };
        for order_id in ids {
            if let Err(e) = self.redispatch(order_id, cutoff, report).await {
                warn!(order_id, error = %e, "pending order sweep failed");
                report.errors += 1;
            }
        }
    }

    pub(crate) async fn redispatch(
        &self,
        order_id: i64,
        cutoff: NaiveDateTime,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        let claimed = with_conn(self.pipeline.pool(), move |conn| {
            orders::claim_stale_order(conn, order_id, OrderStatus::Pending, cutoff)
        })
        .await?;
        let order = match claimed {
            Some(order) => order,
            None => return Ok(()),
        };

        if order.dispatch_attempts > self.settings.max_dispatch_attempts {
            let attempts = order.dispatch_attempts - 1;
            let transition = with_conn(self.pipeline.pool(), move |conn| {
                orders::fail_and_refund(conn, order_id, &format!("dispatch failed after {attempts} attempts"))
            })
            .await?;
            if let orders::Transition::Applied(_) = transition {
                report.pending_failed += 1;
            }
            return Ok(());
        }

        let order = self.pipeline.dispatch(order).await?;
        match order.status()? {
            OrderStatus::Processing => report.pending_redispatched += 1,
            OrderStatus::Failed => report.pending_failed += 1,
            _ => {}
        }
        Ok(())
    }

    async fn sweep_processing(&self, report: &mut ReconcileReport) {
        let cutoff = before_now(self.settings.processing_poll_after);
        let deadline = before_now(self.settings.processing_deadline);
        let batch = self.settings.batch_size;
        let ids = with_conn(self.pipeline.pool(), move |conn| {
            orders::stale_order_ids(conn, OrderStatus::Processing, cutoff, batch)
        })
        .await;
        let ids = match ids {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list processing orders");
                report.errors += 1;
                return;
            }
        };
        for order_id in ids {
            if let Err(e) = self.poll(order_id, cutoff, deadline, report).await {
                warn!(order_id, error = %e, "processing order sweep failed");
                report.errors += 1;
            }
        }
    }

    /// Polls the provider for an order that never reported back. Orders
    /// created before `deadline` that are still unresolved are failed and
    /// refunded.
    pub(crate) async fn poll(
        &self,
        order_id: i64,
        cutoff: NaiveDateTime,
        deadline: NaiveDateTime,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        let claimed = with_conn(self.pipeline.pool(), move |conn| {
            orders::claim_stale_order(conn, order_id, OrderStatus::Processing, cutoff)
        })
        .await?;
        let order = match claimed {
            Some(order) => order,
            None => return Ok(()),
        };
        report.processing_polled += 1;

        if let Some(task_id) = order.task_id.clone() {
            match self.pipeline.provider().check_status(&task_id).await {
                Ok(status) => {
                    let applied = with_conn(self.pipeline.pool(), move |conn| {
                        apply_provider_status(conn, &task_id, status)
                    })
                    .await;
                    match applied {
                        Ok(CallbackOutcome::Applied(order)) if order.status()?.is_terminal() => {
                            report.processing_resolved += 1;
                            return Ok(());
                        }
                        Ok(CallbackOutcome::Ignored(_)) => return Ok(()),
                        Ok(CallbackOutcome::Applied(_)) | Err(CoreError::DuplicateCallback(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => warn!(order_id, error = %e, "provider status poll failed"),
            }
        }

        if order.created_at < deadline {
            let transition = with_conn(self.pipeline.pool(), move |conn| {
                orders::fail_and_refund(conn, order_id, "provider did not complete the order in time")
            })
            .await?;
            if let orders::Transition::Applied(_) = transition {
                report.processing_expired += 1;
            }
        }
        Ok(())
    }

    async fn sweep_rollovers(&self, report: &mut ReconcileReport) {
        let at = now();
        let batch = self.settings.batch_size;
        let ids = with_conn(self.pipeline.pool(), move |conn| rollovers::expired_rollover_ids(conn, at, batch)).await;
        let ids = match ids {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list expired rollovers");
                report.errors += 1;
                return;
            }
        };
        // one transaction per record: a failure on one leaves the rest to expire
        for rollover_id in ids {
            match with_conn(self.pipeline.pool(), move |conn| rollovers::expire_rollover(conn, rollover_id)).await {
                Ok(Some(_)) => report.rollovers_expired += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(rollover_id, error = %e, "rollover expiry failed");
                    report.errors += 1;
                }
            }
        }
    }
}
