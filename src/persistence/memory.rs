use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CandleStore, CredentialStore, FillStore, OrderStore, PositionStore, RiskPolicyStore};
use crate::execution::{Credentials, Fill, Order};
use crate::ledger::Position;
use crate::models::{Candle, MarketKey};
use crate::risk::RiskPolicy;
use crate::Result;

#[derive(Default)]
struct FillLog {
    fills: Vec<Fill>,
    external_ids: HashSet<String>,
}

/// Process-local implementation of every store.
///
/// Used by tests and by `quantdesk` when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    candles: RwLock<HashMap<MarketKey, BTreeMap<DateTime<Utc>, Candle>>>,
    orders: RwLock<HashMap<Uuid, Order>>,
    fills: RwLock<FillLog>,
    positions: RwLock<HashMap<(String, String), Position>>,
    policies: RwLock<HashMap<String, RiskPolicy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn upsert_candles(&self, key: &MarketKey, candles: &[Candle]) -> Result<usize> {
        let mut all = self.candles.write().await;
        let series = all.entry(key.clone()).or_default();
        for candle in candles {
            series.insert(candle.timestamp, candle.clone());
        }
        Ok(candles.len())
    }

    async fn find_candles(
        &self,
        key: &MarketKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let all = self.candles.read().await;
        Ok(all
            .get(key)
            .map(|series| series.range(from..=to).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest_candles(&self, key: &MarketKey, limit: usize) -> Result<Vec<Candle>> {
        let all = self.candles.read().await;
        let Some(series) = all.get(key) else {
            return Ok(Vec::new());
        };
        let mut latest: Vec<Candle> = series.values().rev().take(limit).cloned().collect();
        latest.reverse();
        Ok(latest)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn orders_for_account(&self, account_id: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.account_id == account_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl FillStore for MemoryStore {
    async fn append_fill(&self, fill: &Fill) -> Result<bool> {
        let mut log = self.fills.write().await;
        if !log.external_ids.insert(fill.external_id.clone()) {
            return Ok(false);
        }
        log.fills.push(fill.clone());
        Ok(true)
    }

    async fn fills_for_order(&self, order_id: Uuid) -> Result<Vec<Fill>> {
        Ok(self
            .fills
            .read()
            .await
            .fills
            .iter()
            .filter(|f| f.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn fills_for_position(&self, account_id: &str, symbol: &str) -> Result<Vec<Fill>> {
        let mut fills: Vec<Fill> = self
            .fills
            .read()
            .await
            .fills
            .iter()
            .filter(|f| f.account_id == account_id && f.symbol == symbol)
            .cloned()
            .collect();
        fills.sort_by_key(|f| f.timestamp);
        Ok(fills)
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn find_position(&self, account_id: &str, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .get(&(account_id.to_string(), symbol.to_string()))
            .cloned())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        self.positions.write().await.insert(
            (position.account_id.clone(), position.symbol.clone()),
            position.clone(),
        );
        Ok(())
    }

    async fn positions_for_account(&self, account_id: &str) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }
}

#[async_trait]
impl RiskPolicyStore for MemoryStore {
    async fn find_policy(&self, account_id: &str) -> Result<Option<RiskPolicy>> {
        Ok(self.policies.read().await.get(account_id).cloned())
    }

    async fn save_policy(&self, account_id: &str, policy: &RiskPolicy) -> Result<()> {
        self.policies
            .write()
            .await
            .insert(account_id.to_string(), policy.clone());
        Ok(())
    }
}

/// Credentials supplied up front, typically from configuration
pub struct StaticCredentials {
    keys: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new(keys: HashMap<String, Credentials>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credentials(&self, account_id: &str) -> Result<Option<Credentials>> {
        Ok(self.keys.get(account_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{OrderRequest, OrderSide, OrderStatus};
    use crate::models::Timeframe;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(hour: u32, close: f64) -> Candle {
        Candle::new(
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            close,
            close,
            close,
            close,
            1.0,
        )
    }

    #[tokio::test]
    async fn test_candle_upsert_replaces_same_timestamp() {
        let store = MemoryStore::new();
        let key = MarketKey::new("bithumb", "BTC/KRW", Timeframe::H1);

        store.upsert_candles(&key, &[candle(0, 1.0), candle(1, 2.0)]).await.unwrap();
        store.upsert_candles(&key, &[candle(1, 3.0), candle(2, 4.0)]).await.unwrap();

        let latest = store.latest_candles(&key, 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].close, 3.0);
        assert_eq!(latest[1].close, 4.0);

        let range = store
            .find_candles(
                &key,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(range.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_fill_is_rejected() {
        let store = MemoryStore::new();
        let fill = Fill {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            external_id: "ex-1".to_string(),
            account_id: "acc-1".to_string(),
            symbol: "BTC/KRW".to_string(),
            side: OrderSide::Buy,
            price: dec!(100),
            amount: dec!(1),
            fee: dec!(0),
            fee_currency: "KRW".to_string(),
            timestamp: Utc::now(),
        };

        assert!(store.append_fill(&fill).await.unwrap());
        assert!(!store.append_fill(&Fill { id: Uuid::new_v4(), ..fill.clone() }).await.unwrap());
        assert_eq!(store.fills_for_order(fill.order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_open_orders() {
        let store = MemoryStore::new();
        let request = OrderRequest::market("acc-1", "BTC/KRW", OrderSide::Buy, dec!(1));

        let open = Order::new(&request);
        let mut done = Order::new(&request);
        done.status = OrderStatus::Filled;
        store.save_order(&open).await.unwrap();
        store.save_order(&done).await.unwrap();

        assert_eq!(store.count_open_orders("acc-1").await.unwrap(), 1);
        assert_eq!(store.count_open_orders("acc-2").await.unwrap(), 0);
    }
}
