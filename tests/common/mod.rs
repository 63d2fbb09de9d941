#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quantdesk::execution::{
    Credentials, Exchange, ExchangeConnector, ExchangeFactory, ExchangeOrder, ExchangeOrderRequest,
    OrderService, RetryPolicy, TaskQueue,
};
use quantdesk::ledger::PositionLedger;
use quantdesk::persistence::{MemoryStore, StaticCredentials};
use quantdesk::risk::{RiskPolicy, RiskService};
use quantdesk::{Balance, Candle, Result, Ticker, Timeframe, TradingError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const ACCOUNT: &str = "acc-1";
pub const SYMBOL: &str = "BTC/KRW";

/// Exchange double that answers `create_order` from a script and
/// `fetch_order` from whatever the test last set
#[derive(Default)]
pub struct ScriptedExchange {
    create_responses: Mutex<VecDeque<Result<ExchangeOrder>>>,
    remote_orders: Mutex<HashMap<String, ExchangeOrder>>,
    create_calls: Mutex<usize>,
    cancel_calls: Mutex<Vec<String>>,
}

impl ScriptedExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn push_create(&self, response: Result<ExchangeOrder>) {
        if let Ok(order) = &response {
            self.set_remote(order.clone()).await;
        }
        self.create_responses.lock().await.push_back(response);
    }

    pub async fn set_remote(&self, order: ExchangeOrder) {
        self.remote_orders
            .lock()
            .await
            .insert(order.external_order_id.clone(), order);
    }

    pub async fn create_calls(&self) -> usize {
        *self.create_calls.lock().await
    }

    pub async fn cancel_calls(&self) -> Vec<String> {
        self.cancel_calls.lock().await.clone()
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn fetch_candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _since: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        Err(TradingError::ExchangeFatal(format!("no ticker for {}", symbol)))
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>> {
        Ok(Vec::new())
    }

    async fn create_order(&self, _request: &ExchangeOrderRequest) -> Result<ExchangeOrder> {
        *self.create_calls.lock().await += 1;
        self.create_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(TradingError::ExchangeTransient("script exhausted".into())))
    }

    async fn cancel_order(&self, external_order_id: &str, _symbol: &str) -> Result<bool> {
        self.cancel_calls
            .lock()
            .await
            .push(external_order_id.to_string());
        Ok(true)
    }

    async fn fetch_order(&self, external_order_id: &str, _symbol: &str) -> Result<ExchangeOrder> {
        self.remote_orders
            .lock()
            .await
            .get(external_order_id)
            .cloned()
            .ok_or_else(|| TradingError::ExchangeFatal(format!("unknown order {}", external_order_id)))
    }
}

struct ScriptedFactory(Arc<ScriptedExchange>);

impl ExchangeFactory for ScriptedFactory {
    fn connect(&self, _exchange_id: &str, _credentials: &Credentials) -> Result<Arc<dyn Exchange>> {
        Ok(self.0.clone())
    }
}

pub struct TestDesk {
    pub store: Arc<MemoryStore>,
    pub exchange: Arc<ScriptedExchange>,
    pub ledger: Arc<PositionLedger>,
    pub orders: Arc<OrderService>,
}

/// Order service over a scripted exchange with a started queue
pub async fn desk() -> TestDesk {
    let store = Arc::new(MemoryStore::new());
    let exchange = ScriptedExchange::new();

    let credentials = StaticCredentials::new(HashMap::from([(
        ACCOUNT.to_string(),
        Credentials {
            api_key: "key".to_string(),
            secret: "secret".to_string(),
        },
    )]));
    let connector = Arc::new(ExchangeConnector::new(
        "scripted",
        Arc::new(ScriptedFactory(exchange.clone())),
        Arc::new(credentials),
    ));

    let risk = Arc::new(RiskService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        RiskPolicy::default(),
        Duration::from_secs(30),
    ));
    let ledger = Arc::new(PositionLedger::new(store.clone(), store.clone()));
    let queue = TaskQueue::new("orders", 2, 64, RetryPolicy::default());

    let orders = Arc::new(OrderService::new(
        store.clone(),
        store.clone(),
        risk,
        ledger.clone(),
        connector,
        queue.clone(),
    ));
    orders.register().await;
    queue.start().await.expect("queue starts once");

    TestDesk {
        store,
        exchange,
        ledger,
        orders,
    }
}
