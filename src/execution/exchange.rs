use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderSide, OrderStatus, OrderType};
use crate::error::TradingError;
use crate::models::{Balance, Candle, Ticker, Timeframe};
use crate::persistence::CredentialStore;
use crate::Result;

/// API key pair for one account on one exchange
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"***")
            .finish()
    }
}

/// Order as sent to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOrderRequest {
    /// Lets the exchange drop a resubmission of the same order
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeFill {
    /// Exchange-assigned, used to deduplicate
    pub fill_id: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub timestamp: DateTime<Utc>,
}

/// Exchange view of an order, with every fill it has seen so far
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOrder {
    pub external_order_id: String,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub fills: Vec<ExchangeFill>,
}

/// Market access for one authenticated account.
///
/// Network failures come back as `ExchangeTransient`; rejected credentials,
/// unknown symbols and similar as `ExchangeFatal`.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn fetch_balance(&self) -> Result<Vec<Balance>>;

    async fn create_order(&self, request: &ExchangeOrderRequest) -> Result<ExchangeOrder>;

    async fn cancel_order(&self, external_order_id: &str, symbol: &str) -> Result<bool>;

    async fn fetch_order(&self, external_order_id: &str, symbol: &str) -> Result<ExchangeOrder>;
}

/// Opens authenticated exchange sessions
pub trait ExchangeFactory: Send + Sync {
    fn connect(&self, exchange_id: &str, credentials: &Credentials) -> Result<Arc<dyn Exchange>>;
}

/// One exchange session per account, created on first use
pub struct ExchangeConnector {
    exchange_id: String,
    factory: Arc<dyn ExchangeFactory>,
    credentials: Arc<dyn CredentialStore>,
    sessions: RwLock<HashMap<String, Arc<dyn Exchange>>>,
}

impl ExchangeConnector {
    pub fn new(
        exchange_id: impl Into<String>,
        factory: Arc<dyn ExchangeFactory>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            factory,
            credentials,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub async fn for_account(&self, account_id: &str) -> Result<Arc<dyn Exchange>> {
        if let Some(session) = self.sessions.read().await.get(account_id) {
            return Ok(session.clone());
        }

        let credentials = self.credentials.credentials(account_id).await?.ok_or_else(|| {
            TradingError::ExchangeFatal(format!("no credentials for account {}", account_id))
        })?;

        let mut sessions = self.sessions.write().await;
        // another task may have connected while we waited for the lock
        if let Some(session) = sessions.get(account_id) {
            return Ok(session.clone());
        }

        let session = self.factory.connect(&self.exchange_id, &credentials)?;
        tracing::info!(account_id, exchange = %self.exchange_id, "🔌 Exchange session opened");
        sessions.insert(account_id.to_string(), session.clone());
        Ok(session)
    }

    /// Drop a cached session, e.g. after its credentials were rotated
    pub async fn disconnect(&self, account_id: &str) {
        self.sessions.write().await.remove(account_id);
    }
}
