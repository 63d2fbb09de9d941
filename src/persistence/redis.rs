use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::CandleStore;
use crate::error::TradingError;
use crate::models::{Candle, MarketKey};
use crate::Result;

/// Candle cache in Redis.
///
/// Each stream is a sorted set `candles:{exchange}:{symbol}:{timeframe}`
/// holding JSON candles scored by their timestamp in milliseconds.
#[derive(Clone)]
pub struct RedisCandleStore {
    conn: ConnectionManager,
}

pub(crate) fn candle_key(key: &MarketKey) -> String {
    format!("candles:{}:{}:{}", key.exchange, key.symbol, key.timeframe)
}

impl RedisCandleStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| TradingError::Storage("Redis connection timeout after 5 seconds".to_string()))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    /// Drop candles older than `before`
    pub async fn trim_before(&self, key: &MarketKey, before: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn
            .zrembyscore(candle_key(key), "-inf", format!("({}", before.timestamp_millis()))
            .await?;

        if removed > 0 {
            tracing::debug!(market = %key, removed, "Trimmed old candles");
        }
        Ok(removed)
    }

    pub async fn count(&self, key: &MarketKey) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(candle_key(key)).await?)
    }
}

fn decode(values: Vec<String>) -> Result<Vec<Candle>> {
    values
        .iter()
        .map(|json| serde_json::from_str(json).map_err(TradingError::from))
        .collect()
}

#[async_trait]
impl CandleStore for RedisCandleStore {
    async fn upsert_candles(&self, key: &MarketKey, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let redis_key = candle_key(key);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for candle in candles {
            let score = candle.timestamp.timestamp_millis();
            // replace whatever was stored for this bucket
            pipe.zrembyscore(&redis_key, score, score).ignore();
            pipe.zadd(&redis_key, serde_json::to_string(candle)?, score).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!(market = %key, count = candles.len(), "Saved candles to Redis");
        Ok(candles.len())
    }

    async fn find_candles(
        &self,
        key: &MarketKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .zrangebyscore(candle_key(key), from.timestamp_millis(), to.timestamp_millis())
            .await?;
        decode(values)
    }

    async fn latest_candles(&self, key: &MarketKey, limit: usize) -> Result<Vec<Candle>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .zrevrange(candle_key(key), 0, limit as isize - 1)
            .await?;
        let mut candles = decode(values)?;
        candles.reverse();
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;

    #[test]
    fn test_key_layout() {
        let key = MarketKey::new("bithumb", "BTC/KRW", Timeframe::M5);
        assert_eq!(candle_key(&key), "candles:bithumb:BTC/KRW:5m");
    }

    // Requires a running Redis (REDIS_URL); run with --ignored
    #[tokio::test]
    #[ignore]
    async fn test_upsert_and_read_back() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisCandleStore::connect(&url).await.unwrap();
        let key = MarketKey::new("test", "XRP/KRW", Timeframe::M1);

        let now = Utc::now();
        let first = Candle::new(now, 1.0, 1.0, 1.0, 1.0, 1.0);
        let replaced = Candle::new(now, 2.0, 2.0, 2.0, 2.0, 2.0);
        store.upsert_candles(&key, &[first]).await.unwrap();
        store.upsert_candles(&key, &[replaced.clone()]).await.unwrap();

        let latest = store.latest_candles(&key, 1).await.unwrap();
        assert_eq!(latest[0].close, replaced.close);

        store.trim_before(&key, now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(store.count(&key).await.unwrap(), 0);
    }
}
