//! Storage seams. The core only talks to these narrow traits; adapters
//! decide how records are laid out.

pub mod memory;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::execution::{Credentials, Fill, Order};
use crate::ledger::Position;
use crate::models::{Candle, MarketKey};
use crate::risk::RiskPolicy;
use crate::Result;

pub use memory::{MemoryStore, StaticCredentials};
pub use postgres::PostgresStore;
pub use self::redis::RedisCandleStore;

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Insert or replace candles by timestamp; returns how many were written
    async fn upsert_candles(&self, key: &MarketKey, candles: &[Candle]) -> Result<usize>;

    /// Candles in `[from, to]`, oldest first
    async fn find_candles(
        &self,
        key: &MarketKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// The most recent `limit` candles, oldest first
    async fn latest_candles(&self, key: &MarketKey, limit: usize) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;

    /// Insert or update by id
    async fn save_order(&self, order: &Order) -> Result<()>;

    /// All orders of an account, oldest first
    async fn orders_for_account(&self, account_id: &str) -> Result<Vec<Order>>;

    async fn count_open_orders(&self, account_id: &str) -> Result<usize> {
        Ok(self
            .orders_for_account(account_id)
            .await?
            .iter()
            .filter(|o| o.status.is_open())
            .count())
    }
}

#[async_trait]
pub trait FillStore: Send + Sync {
    /// Append a fill. Returns `false` (and stores nothing) when a fill with
    /// the same exchange fill id was already recorded.
    async fn append_fill(&self, fill: &Fill) -> Result<bool>;

    async fn fills_for_order(&self, order_id: Uuid) -> Result<Vec<Fill>>;

    /// Every fill of an account on one symbol, oldest first
    async fn fills_for_position(&self, account_id: &str, symbol: &str) -> Result<Vec<Fill>>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn find_position(&self, account_id: &str, symbol: &str) -> Result<Option<Position>>;

    async fn save_position(&self, position: &Position) -> Result<()>;

    async fn positions_for_account(&self, account_id: &str) -> Result<Vec<Position>>;
}

#[async_trait]
pub trait RiskPolicyStore: Send + Sync {
    async fn find_policy(&self, account_id: &str) -> Result<Option<RiskPolicy>>;

    async fn save_policy(&self, account_id: &str, policy: &RiskPolicy) -> Result<()>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, account_id: &str) -> Result<Option<Credentials>>;
}
