// Market data collection: polling, validation, backfill
pub mod backfill;
pub mod scheduler;
pub mod validator;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::execution::Exchange;
use crate::models::{MarketKey, Timeframe};
use crate::persistence::CandleStore;
use crate::Result;

pub use backfill::{
    month_range, plan_jobs, BackfillHandler, BackfillJob, BackfillJobStatus, BackfillRequest,
    BackfillService, BACKFILL_TASK,
};
pub use scheduler::PollingTrigger;
pub use validator::{CandleError, CandleValidator};

/// Timeframes collected continuously and warmed up on startup
pub const DEFAULT_TIMEFRAMES: [Timeframe; 2] = [Timeframe::M1, Timeframe::M5];

pub const WARM_UP_CANDLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedBatch {
    pub fetched: usize,
    pub stored: usize,
    /// Newest timestamp the exchange returned, stored or not
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Pulls candles from an exchange into the candle store
pub struct CandleCollector {
    exchange: Arc<dyn Exchange>,
    candles: Arc<dyn CandleStore>,
    validator: CandleValidator,
}

impl CandleCollector {
    pub fn new(exchange: Arc<dyn Exchange>, candles: Arc<dyn CandleStore>) -> Self {
        Self {
            exchange,
            candles,
            validator: CandleValidator::new(),
        }
    }

    pub fn exchange_id(&self) -> &str {
        self.exchange.id()
    }

    /// Fetch, validate and store candles; returns how many were stored
    pub async fn fetch_and_save(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<usize> {
        let batch = self.fetch_batch(symbol, timeframe, since, None, limit).await?;
        Ok(batch.stored)
    }

    /// Like `fetch_and_save`, but drops anything after `until` and reports
    /// where the exchange stopped so a caller can page forward.
    pub async fn fetch_batch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<FetchedBatch> {
        let key = MarketKey::new(self.exchange.id(), symbol, timeframe);
        let mut fetched = self
            .exchange
            .fetch_candles(symbol, timeframe, since, limit)
            .await?;
        let fetched_count = fetched.len();
        let last_timestamp = fetched.iter().map(|c| c.timestamp).max();

        if let Some(until) = until {
            fetched.retain(|c| c.timestamp <= until);
        }

        let valid = self.validator.retain_valid(&key.to_string(), fetched);
        let stored = if valid.is_empty() {
            0
        } else {
            self.candles.upsert_candles(&key, &valid).await?
        };

        tracing::debug!(market = %key, fetched = fetched_count, stored, "Candles saved");
        Ok(FetchedBatch {
            fetched: fetched_count,
            stored,
            last_timestamp,
        })
    }

    /// Collect the latest candles for every symbol on the default
    /// timeframes. A failing market is logged and the rest continue.
    pub async fn warm_up(&self, symbols: &[String]) -> usize {
        tracing::info!(symbols = symbols.len(), "🔥 Warming up candle history");

        let mut total = 0;
        for symbol in symbols {
            for timeframe in DEFAULT_TIMEFRAMES {
                match self.fetch_and_save(symbol, timeframe, None, WARM_UP_CANDLES).await {
                    Ok(stored) => total += stored,
                    Err(e) => {
                        tracing::warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "Warm-up failed");
                    }
                }
            }
        }

        tracing::info!(stored = total, "✅ Warm-up complete");
        total
    }

    /// One polling pass: latest `limit` candles for each symbol
    pub async fn collect(&self, symbols: &[String], timeframe: Timeframe, limit: usize) {
        for symbol in symbols {
            if let Err(e) = self.fetch_and_save(symbol, timeframe, None, limit).await {
                tracing::warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "Candle collection failed");
            }
        }
    }
}
