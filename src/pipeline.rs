use std::sync::Arc;

use diesel::{Connection, PgConnection};
use tracing::{info, instrument, warn};

use crate::database::connect::{with_conn, DbPool};
use crate::database::models::Order;
use crate::database::orders::{self, Transition};
use crate::domain::OrderStatus;
use crate::errors::CoreError;
use crate::provider::{FulfillmentProvider, PlaceOrder, ProviderError, ProviderStatus};

#[derive(Debug)]
pub enum CallbackOutcome {
    Applied(Order),
    /// The order is terminal in a different state; the report was dropped.
    Ignored(Order),
}

impl CallbackOutcome {
    pub fn into_order(self) -> Order {
        match self {
            CallbackOutcome::Applied(order) | CallbackOutcome::Ignored(order) => order,
        }
    }
}

/// Lifecycle of a purchase: debit, dispatch, asynchronous resolution.
#[derive(Clone)]
pub struct OrderPipeline {
    pool: DbPool,
    provider: Arc<dyn FulfillmentProvider>,
}

impl OrderPipeline {
    pub fn new(pool: DbPool, provider: Arc<dyn FulfillmentProvider>) -> Self {
        Self { pool, provider }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn provider(&self) -> &Arc<dyn FulfillmentProvider> {
        &self.provider
    }

    /// Debits the site's cost, creates the order and hands it to the provider.
    ///
    /// A debit failure means no order exists. A dispatch that the provider
    /// refuses is failed and refunded before returning. A dispatch that times
    /// out stays PENDING for the reconciliation sweep to retry, since the
    /// provider may still have accepted it.
    #[instrument(skip(self))]
    pub async fn submit_order(&self, user_id: &str, site_id: &str, item_id: &str, url: &str) -> Result<Order, CoreError> {
        for (name, value) in [("providerId", site_id), ("itemId", item_id), ("url", url)] {
            if value.trim().is_empty() {
                return Err(CoreError::BadRequest(name.to_string()));
            }
        }

        let (user_id, site_id, item_id, url) = (user_id.to_string(), site_id.to_string(), item_id.to_string(), url.to_string());
        let order = with_conn(&self.pool, move |conn| orders::create_order(conn, &user_id, &site_id, &item_id, &url)).await?;
        self.dispatch(order).await
    }

    pub(crate) async fn dispatch(&self, order: Order) -> Result<Order, CoreError> {
        let request = PlaceOrder {
            reference: order.id.to_string(),
            site: order.stock_site_id.clone(),
            item_id: order.stock_item_id.clone(),
            url: order.source_url.clone(),
        };
        let order_id = order.id;

        match self.provider.place_order(&request).await {
            Ok(task_id) => {
                let transition = with_conn(&self.pool, move |conn| orders::mark_processing(conn, order_id, &task_id)).await?;
                if let Transition::Unchanged(order) = &transition {
                    warn!(order_id, status = order.status.as_str(), "order left PENDING before dispatch was recorded");
                }
                Ok(transition.into_order())
            }
            Err(ProviderError::Rejected(message)) => {
                warn!(order_id, reason = message.as_str(), "provider rejected order");
                with_conn(&self.pool, move |conn| orders::fail_and_refund(conn, order_id, &message))
                    .await
                    .map(Transition::into_order)
            }
            Err(ProviderError::Unavailable(message)) => {
                warn!(order_id, reason = message.as_str(), "provider unavailable, order left for retry");
                Ok(order)
            }
        }
    }

    /// Applies a webhook report. Duplicates come back as
    /// [`CoreError::DuplicateCallback`] for the caller to absorb.
    #[instrument(skip(self))]
    pub async fn on_provider_callback(&self, task_id: &str, status: ProviderStatus) -> Result<CallbackOutcome, CoreError> {
        let task_id = task_id.to_string();
        with_conn(&self.pool, move |conn| apply_provider_status(conn, &task_id, status)).await
    }

    /// Fetches a fresh link for a READY order at no point cost. Provider
    /// failures here leave the order untouched.
    #[instrument(skip(self))]
    pub async fn regenerate_download_link(&self, order_id: i64) -> Result<Order, CoreError> {
        let order = with_conn(&self.pool, move |conn| orders::load_order(conn, order_id)).await?;
        let task_id = match (order.status()?, order.task_id.as_deref()) {
            (OrderStatus::Ready, Some(task_id)) => task_id.to_string(),
            _ => return Err(CoreError::InvalidState(format!("order {order_id} is not ready"))),
        };

        let link = self.provider.download_link(&task_id).await.map_err(|e| {
            warn!(order_id, error = %e, "download link regeneration failed");
            CoreError::from(e)
        })?;
        with_conn(&self.pool, move |conn| {
            orders::update_download_link(conn, order_id, &link.download_url, link.file_name.as_deref())
        })
        .await
    }
}

/// Applies one provider report to the order owning `task_id`, under its row lock.
pub fn apply_provider_status(conn: &mut PgConnection, task_id: &str, status: ProviderStatus) -> Result<CallbackOutcome, CoreError> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let order = orders::lock_order_by_task(conn, task_id)?;
        let current = order.status()?;

        let outcome = match status {
            ProviderStatus::Ready { download_url, file_name } => match current {
                OrderStatus::Ready => return Err(CoreError::DuplicateCallback(task_id.to_string())),
                OrderStatus::Failed | OrderStatus::Refunded => CallbackOutcome::Ignored(order),
                OrderStatus::Pending | OrderStatus::Processing => {
                    match orders::mark_ready(conn, order.id, &download_url, file_name.as_deref())? {
                        Transition::Applied(order) => CallbackOutcome::Applied(order),
                        Transition::Unchanged(order) => CallbackOutcome::Ignored(order),
                    }
                }
            },
            ProviderStatus::Failed { message } => match current {
                OrderStatus::Failed | OrderStatus::Refunded => return Err(CoreError::DuplicateCallback(task_id.to_string())),
                OrderStatus::Ready => CallbackOutcome::Ignored(order),
                OrderStatus::Pending | OrderStatus::Processing => match orders::fail_and_refund(conn, order.id, &message)? {
                    Transition::Applied(order) => CallbackOutcome::Applied(order),
                    Transition::Unchanged(order) => CallbackOutcome::Ignored(order),
                },
            },
            ProviderStatus::Processing => match current {
                OrderStatus::Processing => return Err(CoreError::DuplicateCallback(task_id.to_string())),
                OrderStatus::Pending => match orders::mark_processing(conn, order.id, task_id)? {
                    Transition::Applied(order) => CallbackOutcome::Applied(order),
                    Transition::Unchanged(order) => CallbackOutcome::Ignored(order),
                },
                OrderStatus::Ready | OrderStatus::Failed | OrderStatus::Refunded => CallbackOutcome::Ignored(order),
            },
        };

        if let CallbackOutcome::Ignored(order) = &outcome {
            warn!(order_id = order.id, task_id, status = order.status.as_str(), "report ignored for terminal order");
        } else {
            info!(task_id, "provider report applied");
        }
        Ok(outcome)
    })
}
