use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::exchange::{ExchangeConnector, ExchangeOrder, ExchangeOrderRequest};
use super::queue::{ProgressReporter, Task, TaskHandler, TaskQueue};
use super::{Fill, Order, OrderRequest, OrderStatus};
use crate::error::TradingError;
use crate::ledger::PositionLedger;
use crate::persistence::{FillStore, OrderStore};
use crate::risk::{OrderProposal, RiskService};
use crate::Result;

pub const EXECUTE_ORDER: &str = "execute-order";
pub const CANCEL_ORDER: &str = "cancel-order";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderTaskPayload {
    order_id: Uuid,
}

/// Places, cancels and tracks orders.
///
/// Creation and cancellation are synchronous up to the queue; exchange
/// traffic happens in `execute-order` / `cancel-order` tasks. Work on a
/// single order is serialized by a per-order lock.
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    fills: Arc<dyn FillStore>,
    risk: Arc<RiskService>,
    ledger: Arc<PositionLedger>,
    exchanges: Arc<ExchangeConnector>,
    queue: TaskQueue,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        fills: Arc<dyn FillStore>,
        risk: Arc<RiskService>,
        ledger: Arc<PositionLedger>,
        exchanges: Arc<ExchangeConnector>,
        queue: TaskQueue,
    ) -> Self {
        Self {
            orders,
            fills,
            risk,
            ledger,
            exchanges,
            queue,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register the execute/cancel handlers on the order queue
    pub async fn register(self: &Arc<Self>) {
        let handler = Arc::new(OrderTaskHandler {
            service: self.clone(),
        });
        self.queue.on_task(EXECUTE_ORDER, handler.clone()).await;
        self.queue.on_task(CANCEL_ORDER, handler).await;
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Run `work` while holding the order's lock. The lock entry is dropped
    /// once nobody else is waiting on it, whatever the outcome.
    async fn with_order_lock<T>(
        &self,
        order_id: Uuid,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let lock = self.locks.lock().await.entry(order_id).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.locks.lock().await;
        // one reference in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&order_id);
        }
        result
    }

    #[cfg(test)]
    pub(crate) async fn held_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Validate, risk-check, store as NEW and schedule execution
    pub async fn create_order(&self, request: OrderRequest) -> Result<Order> {
        request.validate()?;

        let proposal = OrderProposal {
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            price: request.valuation_price(),
        };
        let check = self.risk.validate_order(&request.account_id, &proposal).await;
        if let (false, Some(failed)) = (check.passed, check.failing_check) {
            return Err(TradingError::RiskRejected {
                check: failed,
                reason: check.reason.unwrap_or_default(),
            });
        }

        let order = Order::new(&request);
        self.orders.save_order(&order).await?;

        tracing::info!(
            order_id = %order.id,
            account_id = %order.account_id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            order_type = order.order_type.as_str(),
            amount = %order.amount,
            "📝 Order created"
        );

        self.queue
            .enqueue(
                EXECUTE_ORDER,
                format!("{}-{}", EXECUTE_ORDER, order.id),
                json!({ "orderId": order.id }),
            )
            .await?;

        Ok(order)
    }

    /// Cancel an order.
    ///
    /// Unsubmitted orders are canceled on the spot. Submitted ones get a
    /// `cancel-order` task and are returned unchanged; watch the status.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order> {
        self.with_order_lock(order_id, self.request_cancel(order_id)).await
    }

    async fn request_cancel(&self, order_id: Uuid) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        if order.status.is_terminal() {
            return Err(TradingError::InvalidStateTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Canceled,
            });
        }

        let Some(external_order_id) = order.external_order_id.clone() else {
            order.transition(OrderStatus::Canceled)?;
            self.orders.save_order(&order).await?;
            tracing::info!(order_id = %order.id, "🚫 Order canceled before submission");
            return Ok(order);
        };

        self.queue
            .enqueue(
                CANCEL_ORDER,
                format!("{}-{}", CANCEL_ORDER, order.id),
                json!({ "orderId": order.id, "externalOrderId": external_order_id }),
            )
            .await?;

        tracing::info!(order_id = %order.id, external_order_id = %external_order_id, "Cancel requested");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or(TradingError::OrderNotFound(order_id))
    }

    /// Newest first, optionally narrowed to one status
    pub async fn orders_for_account(
        &self,
        account_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .orders_for_account(account_id)
            .await?
            .into_iter()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    pub async fn open_orders(&self, account_id: &str) -> Result<Vec<Order>> {
        Ok(self
            .orders_for_account(account_id, None)
            .await?
            .into_iter()
            .filter(|o| o.status.is_open())
            .collect())
    }

    /// Pull the exchange's view of a submitted order and reconcile fills,
    /// including ones that arrive after a cancel
    pub async fn sync_order(&self, order_id: Uuid) -> Result<Order> {
        self.with_order_lock(order_id, self.sync(order_id)).await
    }

    async fn sync(&self, order_id: Uuid) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        let Some(external_order_id) = order.external_order_id.clone() else {
            return Ok(order);
        };

        let exchange = self.exchanges.for_account(&order.account_id).await?;
        let remote = exchange.fetch_order(&external_order_id, &order.symbol).await?;
        self.reconcile(&mut order, &remote).await?;
        Ok(order)
    }

    async fn execute(&self, order_id: Uuid) -> Result<()> {
        let mut order = self.get_order(order_id).await?;
        if order.status.is_terminal() {
            tracing::info!(order_id = %order.id, status = %order.status, "Order already closed, nothing to execute");
            return Ok(());
        }

        let exchange = self.exchanges.for_account(&order.account_id).await?;

        // a retry after a successful submit only needs to catch up
        if let Some(external_order_id) = order.external_order_id.clone() {
            let remote = exchange.fetch_order(&external_order_id, &order.symbol).await?;
            return self.reconcile(&mut order, &remote).await;
        }

        let remote = exchange
            .create_order(&ExchangeOrderRequest {
                client_order_id: order.id,
                symbol: order.symbol.clone(),
                side: order.side,
                order_type: order.order_type,
                amount: order.amount,
                price: order.price,
            })
            .await?;

        order.transition(OrderStatus::Open)?;
        order.external_order_id = Some(remote.external_order_id.clone());
        order.last_error = None;
        self.orders.save_order(&order).await?;

        tracing::info!(
            order_id = %order.id,
            external_order_id = %remote.external_order_id,
            exchange = %exchange.id(),
            "📤 Order submitted"
        );

        self.reconcile(&mut order, &remote).await
    }

    async fn cancel(&self, order_id: Uuid) -> Result<()> {
        let mut order = self.get_order(order_id).await?;
        if order.status.is_terminal() {
            return Ok(());
        }

        let Some(external_order_id) = order.external_order_id.clone() else {
            order.transition(OrderStatus::Canceled)?;
            self.orders.save_order(&order).await?;
            return Ok(());
        };

        let exchange = self.exchanges.for_account(&order.account_id).await?;
        let accepted = exchange.cancel_order(&external_order_id, &order.symbol).await?;
        if !accepted {
            tracing::warn!(order_id = %order.id, external_order_id = %external_order_id, "Exchange did not cancel, order may already be closed");
        }

        // fills that landed before the cancel took effect
        let remote = exchange.fetch_order(&external_order_id, &order.symbol).await?;
        self.reconcile(&mut order, &remote).await?;

        if !order.status.is_terminal() && accepted {
            order.transition(OrderStatus::Canceled)?;
            self.orders.save_order(&order).await?;
        }

        tracing::info!(order_id = %order.id, status = %order.status, filled = %order.filled, "🚫 Order cancel processed");
        Ok(())
    }

    /// Record new exchange fills, bring `filled`/`remaining` in line with the
    /// fill history and adopt a terminal status reported by the exchange
    async fn reconcile(&self, order: &mut Order, remote: &ExchangeOrder) -> Result<()> {
        let mut fresh = Decimal::ZERO;
        for reported in &remote.fills {
            let fill = Fill {
                id: Uuid::new_v4(),
                order_id: order.id,
                external_id: reported.fill_id.clone(),
                account_id: order.account_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                price: reported.price,
                amount: reported.amount,
                fee: reported.fee,
                fee_currency: reported.fee_currency.clone(),
                timestamp: reported.timestamp,
            };

            if !self.fills.append_fill(&fill).await? {
                tracing::debug!(order_id = %order.id, fill_id = %fill.external_id, "Duplicate fill ignored");
                continue;
            }
            self.ledger.apply_fill(&fill).await?;
            fresh += fill.amount;
        }

        let recorded = self.fills.fills_for_order(order.id).await?;
        let total: Decimal = recorded.iter().map(|f| f.amount).sum();
        let fees: Decimal = recorded.iter().map(|f| f.fee).sum();

        // fills stored by an earlier attempt that never reached the order
        // may not have reached the position either
        if total - order.filled > fresh {
            tracing::warn!(
                order_id = %order.id,
                recorded = %total,
                filled = %order.filled,
                "Fills recorded without order update, rebuilding position"
            );
            self.ledger.rebuild(&order.account_id, &order.symbol).await?;
        }

        let missing = (total - order.filled).min(order.remaining);

        if missing > Decimal::ZERO {
            let applied = order.apply_fill(missing, (fees - order.fee).max(Decimal::ZERO))?;
            tracing::info!(
                order_id = %order.id,
                credited = %applied.credited,
                filled = %order.filled,
                remaining = %order.remaining,
                status = %order.status,
                late = applied.late,
                "💰 Fill recorded"
            );
        }

        let reported = remote.status;
        if reported.is_terminal() && reported != OrderStatus::Filled && !order.status.is_terminal() {
            if order.status.can_transition_to(reported) {
                order.transition(reported)?;
                tracing::info!(order_id = %order.id, status = %order.status, "Exchange closed order");
            } else {
                tracing::warn!(order_id = %order.id, from = %order.status, to = %reported, "Ignoring exchange status");
            }
        }

        self.orders.save_order(order).await
    }

    async fn execute_exhausted(&self, order_id: Uuid, error: &TradingError) -> Result<()> {
        let mut order = self.get_order(order_id).await?;
        if order.status.is_terminal() {
            return Ok(());
        }

        order.last_error = Some(error.to_string());
        if matches!(order.status, OrderStatus::New | OrderStatus::Open) {
            order.transition(OrderStatus::Rejected)?;
        }
        self.orders.save_order(&order).await?;

        tracing::error!(
            order_id = %order.id,
            account_id = %order.account_id,
            symbol = %order.symbol,
            status = %order.status,
            error = %error,
            "❌ Order execution gave up"
        );
        Ok(())
    }

    async fn cancel_exhausted(&self, order_id: Uuid, error: &TradingError) -> Result<()> {
        let mut order = self.get_order(order_id).await?;
        order.last_error = Some(error.to_string());
        self.orders.save_order(&order).await?;

        tracing::error!(
            order_id = %order.id,
            status = %order.status,
            error = %error,
            "❌ Order cancellation gave up"
        );
        Ok(())
    }
}

struct OrderTaskHandler {
    service: Arc<OrderService>,
}

#[async_trait]
impl TaskHandler for OrderTaskHandler {
    async fn handle(&self, task: &Task, _progress: &ProgressReporter) -> Result<()> {
        let payload: OrderTaskPayload = serde_json::from_value(task.payload.clone())?;
        match task.name.as_str() {
            EXECUTE_ORDER => {
                self.service
                    .with_order_lock(payload.order_id, self.service.execute(payload.order_id))
                    .await
            }
            CANCEL_ORDER => {
                self.service
                    .with_order_lock(payload.order_id, self.service.cancel(payload.order_id))
                    .await
            }
            other => Err(TradingError::Queue(format!("unexpected task {}", other))),
        }
    }

    async fn on_exhausted(&self, task: &Task, error: &TradingError) {
        let Ok(payload) = serde_json::from_value::<OrderTaskPayload>(task.payload.clone()) else {
            return;
        };
        let outcome = match task.name.as_str() {
            EXECUTE_ORDER => self.service.execute_exhausted(payload.order_id, error).await,
            CANCEL_ORDER => self.service.cancel_exhausted(payload.order_id, error).await,
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            tracing::error!(task_id = %task.id, error = %e, "Failed to record task failure on order");
        }
    }
}
