// Live signal loop: strategy instances -> market orders
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::collector::PollingTrigger;
use crate::error::TradingError;
use crate::execution::{Order, OrderRequest, OrderService, OrderSide};
use crate::ledger::PositionLedger;
use crate::models::{MarketKey, Timeframe};
use crate::persistence::CandleStore;
use crate::strategy::{Direction, Signal, StrategyConfig};
use crate::Result;

pub const LOOKBACK_CANDLES: usize = 200;
pub const MIN_CANDLES: usize = 50;

/// A configured strategy trading a set of symbols for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInstance {
    pub id: String,
    pub account_id: String,
    pub exchange: String,
    pub timeframe: Timeframe,
    pub symbols: Vec<String>,
    pub strategy_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Quote currency spent per buy signal
    pub order_value: Decimal,
}

/// Evaluates every strategy instance on the latest candles and turns
/// fresh buy/sell signals into market orders.
pub struct SignalLoop {
    candles: Arc<dyn CandleStore>,
    orders: Arc<OrderService>,
    ledger: Arc<PositionLedger>,
    instances: Vec<StrategyInstance>,
    /// Newest signal timestamp acted on per (instance, symbol)
    last_acted: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl SignalLoop {
    pub fn new(
        candles: Arc<dyn CandleStore>,
        orders: Arc<OrderService>,
        ledger: Arc<PositionLedger>,
        instances: Vec<StrategyInstance>,
    ) -> Self {
        Self {
            candles,
            orders,
            ledger,
            instances,
            last_acted: Mutex::new(HashMap::new()),
        }
    }

    pub fn instances(&self) -> &[StrategyInstance] {
        &self.instances
    }

    /// Evaluate on a fixed interval until the task is dropped
    pub async fn run(self: Arc<Self>, every: Duration) {
        let trigger = PollingTrigger::new("signal-loop", every);
        trigger
            .run(move || {
                let this = self.clone();
                async move {
                    this.evaluate_all().await;
                }
            })
            .await;
    }

    /// One pass over every instance and symbol; returns the orders placed
    pub async fn evaluate_all(&self) -> Vec<Order> {
        let mut placed = Vec::new();

        for instance in &self.instances {
            let Some(strategy) = StrategyConfig::from_parts(&instance.strategy_type, &instance.params)
            else {
                continue;
            };

            for symbol in &instance.symbols {
                match self.evaluate(instance, &strategy, symbol).await {
                    Ok(Some(order)) => placed.push(order),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            instance = %instance.id,
                            symbol = %symbol,
                            error = %e,
                            "Signal evaluation failed"
                        );
                    }
                }
            }
        }

        placed
    }

    async fn evaluate(
        &self,
        instance: &StrategyInstance,
        strategy: &StrategyConfig,
        symbol: &str,
    ) -> Result<Option<Order>> {
        let key = MarketKey::new(&instance.exchange, symbol, instance.timeframe);
        let candles = self.candles.latest_candles(&key, LOOKBACK_CANDLES).await?;

        if candles.len() < MIN_CANDLES {
            tracing::warn!(
                instance = %instance.id,
                market = %key,
                available = candles.len(),
                required = MIN_CANDLES,
                "Not enough candles, skipping"
            );
            return Ok(None);
        }

        let Some(signal) = strategy.as_strategy().latest_signal(symbol, &candles) else {
            return Ok(None);
        };

        if !self.mark_acted(instance, symbol, signal.timestamp).await {
            tracing::debug!(instance = %instance.id, symbol, timestamp = %signal.timestamp, "Signal already handled");
            return Ok(None);
        }

        tracing::info!(
            instance = %instance.id,
            symbol,
            direction = ?signal.direction,
            strength = signal.strength,
            price = signal.price,
            reason = %signal.reason,
            "📡 Signal"
        );

        let Some(request) = self.order_for(instance, &signal).await? else {
            return Ok(None);
        };

        match self.orders.create_order(request).await {
            Ok(order) => Ok(Some(order)),
            Err(TradingError::RiskRejected { check, reason }) => {
                tracing::info!(instance = %instance.id, symbol, check = %check, reason = %reason, "Signal order rejected by risk");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Record the signal; `false` if it (or a newer one) was already acted on
    async fn mark_acted(&self, instance: &StrategyInstance, symbol: &str, timestamp: DateTime<Utc>) -> bool {
        let mut last = self.last_acted.lock().await;
        let slot = (instance.id.clone(), symbol.to_string());
        if last.get(&slot).is_some_and(|seen| *seen >= timestamp) {
            return false;
        }
        last.insert(slot, timestamp);
        true
    }

    async fn order_for(&self, instance: &StrategyInstance, signal: &Signal) -> Result<Option<OrderRequest>> {
        let price = match Decimal::from_f64(signal.price) {
            Some(p) if p > Decimal::ZERO => p,
            _ => {
                tracing::warn!(symbol = %signal.symbol, price = signal.price, "Unusable signal price");
                return Ok(None);
            }
        };

        let (side, amount) = match signal.direction {
            Direction::Buy => (OrderSide::Buy, (instance.order_value / price).round_dp(8)),
            Direction::Sell => {
                let held = match self.ledger.position(&instance.account_id, &signal.symbol).await {
                    Ok(position) if position.is_open => position.amount,
                    Ok(_) | Err(TradingError::PositionNotFound { .. }) => Decimal::ZERO,
                    Err(e) => return Err(e),
                };
                (OrderSide::Sell, held)
            }
            Direction::Hold => return Ok(None),
        };

        if amount <= Decimal::ZERO {
            tracing::debug!(instance = %instance.id, symbol = %signal.symbol, side = side.as_str(), "Nothing to trade");
            return Ok(None);
        }

        Ok(Some(
            OrderRequest::market(&instance.account_id, &signal.symbol, side, amount)
                .with_reference_price(price),
        ))
    }
}
