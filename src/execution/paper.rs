// In-process exchange for paper trading and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::exchange::{
    Credentials, Exchange, ExchangeFactory, ExchangeFill, ExchangeOrder, ExchangeOrderRequest,
};
use super::{OrderSide, OrderStatus, OrderType};
use crate::backtest::{MarketScenario, SyntheticDataGenerator};
use crate::error::TradingError;
use crate::models::{Balance, Candle, Ticker, Timeframe};
use crate::Result;

/// Candles kept per paper series
const MAX_PAPER_HISTORY: usize = 10_000;

#[derive(Debug, Clone)]
struct PaperOrder {
    request: ExchangeOrderRequest,
    order: ExchangeOrder,
}

#[derive(Default)]
struct PaperBook {
    prices: HashMap<String, Decimal>,
    candles: HashMap<(String, Timeframe), Vec<Candle>>,
    balances: HashMap<String, Decimal>,
    orders: HashMap<String, PaperOrder>,
    by_client_id: HashMap<Uuid, String>,
    fill_seq: u64,
}

/// Simulated spot exchange.
///
/// Market orders fill in full at the last price. Limit orders rest until
/// `set_price` crosses them. Balances are checked only when they have been
/// seeded with `deposit`; an unfunded paper account trades freely.
pub struct PaperExchange {
    id: String,
    fee_rate: Decimal,
    book: RwLock<PaperBook>,
}

fn split_symbol(symbol: &str) -> (&str, &str) {
    symbol.split_once('/').unwrap_or((symbol, "KRW"))
}

impl PaperExchange {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fee_rate: dec!(0.0025),
            book: RwLock::new(PaperBook::default()),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub async fn deposit(&self, currency: &str, amount: Decimal) {
        let mut book = self.book.write().await;
        *book.balances.entry(currency.to_string()).or_default() += amount;
    }

    /// Provide history for `fetch_candles`; also moves the last price
    pub async fn load_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        let key = (symbol.to_string(), timeframe);
        let moves_price = {
            let mut book = self.book.write().await;
            book.candles.insert(key, candles);
            book.is_finest(symbol, timeframe)
        };
        if moves_price {
            self.move_to_last_close(symbol, timeframe).await;
        }
    }

    /// Extend a series (oldest dropped past the history cap); also moves the
    /// last price
    pub async fn append_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        let moves_price = {
            let mut book = self.book.write().await;
            let series = book.candles.entry((symbol.to_string(), timeframe)).or_default();
            series.extend(candles);
            let excess = series.len().saturating_sub(MAX_PAPER_HISTORY);
            series.drain(..excess);
            book.is_finest(symbol, timeframe)
        };
        if moves_price {
            self.move_to_last_close(symbol, timeframe).await;
        }
    }

    pub async fn last_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let book = self.book.read().await;
        book.candles
            .get(&(symbol.to_string(), timeframe))
            .and_then(|series| series.last().cloned())
    }

    /// Every (symbol, timeframe) with loaded candles
    pub async fn markets(&self) -> Vec<(String, Timeframe)> {
        let mut markets: Vec<(String, Timeframe)> =
            self.book.read().await.candles.keys().cloned().collect();
        markets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.duration_ms().cmp(&b.1.duration_ms())));
        markets
    }

    async fn move_to_last_close(&self, symbol: &str, timeframe: Timeframe) {
        let close = self
            .last_candle(symbol, timeframe)
            .await
            .and_then(|c| Decimal::from_f64_retain(c.close))
            .map(|p| p.round_dp(8));
        if let Some(close) = close {
            self.set_price(symbol, close).await;
        }
    }

    /// Move the market and fill any resting limit orders it crosses
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut book = self.book.write().await;
        book.prices.insert(symbol.to_string(), price);

        let crossed: Vec<String> = book
            .orders
            .iter()
            .filter(|(_, o)| {
                o.request.symbol == symbol
                    && matches!(o.order.status, OrderStatus::Open)
                    && o.request.price.is_some_and(|limit| match o.request.side {
                        OrderSide::Buy => price <= limit,
                        OrderSide::Sell => price >= limit,
                    })
            })
            .map(|(id, _)| id.clone())
            .collect();

        for external_id in crossed {
            if let Some(mut resting) = book.orders.remove(&external_id) {
                let limit = resting.request.price.unwrap_or(price);
                let remaining = resting.request.amount - resting.order.filled;
                let fill = self.fill(&mut book, limit, remaining);
                settle(&mut book.balances, &resting.request, &fill);
                resting.order.filled += fill.amount;
                resting.order.fills.push(fill);
                resting.order.status = OrderStatus::Filled;
                book.orders.insert(external_id, resting);
            }
        }
    }

    fn fill(&self, book: &mut PaperBook, price: Decimal, amount: Decimal) -> ExchangeFill {
        book.fill_seq += 1;
        ExchangeFill {
            fill_id: format!("{}-fill-{}", self.id, book.fill_seq),
            price,
            amount,
            fee: (price * amount * self.fee_rate).round_dp(8),
            fee_currency: "KRW".to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl PaperBook {
    /// The last price follows the shortest timeframe loaded for a symbol
    fn is_finest(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.candles
            .keys()
            .filter(|(s, _)| s == symbol)
            .all(|(_, tf)| tf.duration_ms() >= timeframe.duration_ms())
    }
}

fn settle(balances: &mut HashMap<String, Decimal>, request: &ExchangeOrderRequest, fill: &ExchangeFill) {
    if balances.is_empty() {
        return;
    }
    let (base, quote) = split_symbol(&request.symbol);
    let notional = fill.price * fill.amount;
    let (base_delta, quote_delta) = match request.side {
        OrderSide::Buy => (fill.amount, -(notional + fill.fee)),
        OrderSide::Sell => (-fill.amount, notional - fill.fee),
    };
    *balances.entry(base.to_string()).or_default() += base_delta;
    *balances.entry(quote.to_string()).or_default() += quote_delta;
}

fn check_funds(
    balances: &HashMap<String, Decimal>,
    request: &ExchangeOrderRequest,
    price: Decimal,
) -> Result<()> {
    if balances.is_empty() {
        return Ok(());
    }
    let (base, quote) = split_symbol(&request.symbol);
    let (currency, needed) = match request.side {
        OrderSide::Buy => (quote, request.amount * price),
        OrderSide::Sell => (base, request.amount),
    };
    let available = balances.get(currency).copied().unwrap_or_default();
    if available < needed {
        return Err(TradingError::ExchangeFatal(format!(
            "insufficient {} balance: need {}, have {}",
            currency, needed, available
        )));
    }
    Ok(())
}

#[async_trait]
impl Exchange for PaperExchange {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let book = self.book.read().await;
        let candles = book
            .candles
            .get(&(symbol.to_string(), timeframe))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let selected: Vec<Candle> = match since {
            Some(since) => candles
                .iter()
                .filter(|c| c.timestamp >= since)
                .take(limit)
                .cloned()
                .collect(),
            None => candles[candles.len().saturating_sub(limit)..].to_vec(),
        };
        Ok(selected)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let book = self.book.read().await;
        let price = book
            .prices
            .get(symbol)
            .and_then(|p| p.to_f64())
            .ok_or_else(|| TradingError::ExchangeFatal(format!("no market for {}", symbol)))?;

        Ok(Ticker {
            symbol: symbol.to_string(),
            last: price,
            bid: price,
            ask: price,
            high: price,
            low: price,
            volume: 0.0,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_balance(&self) -> Result<Vec<Balance>> {
        let book = self.book.read().await;
        let mut balances: Vec<Balance> = book
            .balances
            .iter()
            .map(|(currency, total)| {
                let locked: Decimal = book
                    .orders
                    .values()
                    .filter(|o| o.order.status == OrderStatus::Open)
                    .filter(|o| {
                        let (base, quote) = split_symbol(&o.request.symbol);
                        match o.request.side {
                            OrderSide::Buy => quote == currency,
                            OrderSide::Sell => base == currency,
                        }
                    })
                    .map(|o| match o.request.side {
                        OrderSide::Buy => o.request.amount * o.request.price.unwrap_or_default(),
                        OrderSide::Sell => o.request.amount,
                    })
                    .sum();
                Balance {
                    currency: currency.clone(),
                    total: *total,
                    available: *total - locked,
                    locked,
                }
            })
            .collect();
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(balances)
    }

    async fn create_order(&self, request: &ExchangeOrderRequest) -> Result<ExchangeOrder> {
        let mut book = self.book.write().await;

        if let Some(existing) = book.by_client_id.get(&request.client_order_id) {
            if let Some(resting) = book.orders.get(existing) {
                return Ok(resting.order.clone());
            }
        }

        let last = book.prices.get(&request.symbol).copied();
        let external_order_id = format!("{}-{}", self.id, Uuid::new_v4().simple());

        let order = match request.order_type {
            OrderType::Market => {
                let price = last.ok_or_else(|| {
                    TradingError::ExchangeFatal(format!("no market for {}", request.symbol))
                })?;
                check_funds(&book.balances, request, price)?;
                let fill = self.fill(&mut book, price, request.amount);
                settle(&mut book.balances, request, &fill);
                ExchangeOrder {
                    external_order_id: external_order_id.clone(),
                    status: OrderStatus::Filled,
                    filled: request.amount,
                    fills: vec![fill],
                }
            }
            OrderType::Limit => {
                let limit = request.price.ok_or_else(|| {
                    TradingError::ExchangeFatal("limit order without price".to_string())
                })?;
                check_funds(&book.balances, request, limit)?;
                ExchangeOrder {
                    external_order_id: external_order_id.clone(),
                    status: OrderStatus::Open,
                    filled: Decimal::ZERO,
                    fills: Vec::new(),
                }
            }
        };

        book.by_client_id
            .insert(request.client_order_id, external_order_id.clone());
        book.orders.insert(
            external_order_id,
            PaperOrder {
                request: request.clone(),
                order: order.clone(),
            },
        );

        let crosses_now = request.order_type == OrderType::Limit
            && last.is_some_and(|p| match request.side {
                OrderSide::Buy => request.price.is_some_and(|l| p <= l),
                OrderSide::Sell => request.price.is_some_and(|l| p >= l),
            });
        drop(book);

        if crosses_now {
            if let Some(price) = last {
                self.set_price(&request.symbol, price).await;
                return self.fetch_order(&order.external_order_id, &request.symbol).await;
            }
        }

        Ok(order)
    }

    async fn cancel_order(&self, external_order_id: &str, _symbol: &str) -> Result<bool> {
        let mut book = self.book.write().await;
        match book.orders.get_mut(external_order_id) {
            Some(resting) if resting.order.status == OrderStatus::Open => {
                resting.order.status = OrderStatus::Canceled;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(TradingError::ExchangeFatal(format!(
                "unknown order {}",
                external_order_id
            ))),
        }
    }

    async fn fetch_order(&self, external_order_id: &str, _symbol: &str) -> Result<ExchangeOrder> {
        let book = self.book.read().await;
        book.orders
            .get(external_order_id)
            .map(|o| o.order.clone())
            .ok_or_else(|| {
                TradingError::ExchangeFatal(format!("unknown order {}", external_order_id))
            })
    }
}

/// Hands every account the same paper exchange
pub struct PaperExchangeFactory {
    exchange: Arc<PaperExchange>,
}

impl PaperExchangeFactory {
    pub fn new(exchange: Arc<PaperExchange>) -> Self {
        Self { exchange }
    }
}

impl ExchangeFactory for PaperExchangeFactory {
    fn connect(&self, _exchange_id: &str, _credentials: &Credentials) -> Result<Arc<dyn Exchange>> {
        Ok(self.exchange.clone())
    }
}

/// Random-walk market data behind a `PaperExchange`.
///
/// A series starts from stored history when there is some, otherwise from
/// seeded synthetic candles. `advance` then appends one candle for every
/// bucket that has closed since the last one.
pub struct PaperMarket {
    exchange: Arc<PaperExchange>,
    rng: Mutex<StdRng>,
}

fn bucket_start(at: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let ms = at.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(timeframe.duration_ms())).unwrap_or(at)
}

impl PaperMarket {
    pub fn new(exchange: Arc<PaperExchange>, seed: u64) -> Self {
        Self {
            exchange,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn exchange(&self) -> &Arc<PaperExchange> {
        &self.exchange
    }

    /// Start a series. With no `history`, `count` synthetic candles are
    /// generated, the last one being the most recent closed bucket.
    pub async fn open(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        history: Vec<Candle>,
        count: usize,
        now: DateTime<Utc>,
    ) -> usize {
        let candles = if history.is_empty() {
            let seed = self.rng.lock().await.gen::<u64>();
            let start = bucket_start(now, timeframe) - timeframe.duration() * count as i32;
            SyntheticDataGenerator::new(seed)
                .with_start(start)
                .generate(MarketScenario::Sideways, count, timeframe)
        } else {
            history
        };

        let loaded = candles.len();
        self.exchange.load_candles(symbol, timeframe, candles).await;
        tracing::info!(symbol, timeframe = %timeframe, candles = loaded, "📈 Paper market opened");
        loaded
    }

    /// Append candles for buckets closed by `now`; returns how many
    pub async fn advance(&self, now: DateTime<Utc>) -> usize {
        let mut appended = 0;

        for (symbol, timeframe) in self.exchange.markets().await {
            let Some(mut prev) = self.exchange.last_candle(&symbol, timeframe).await else {
                continue;
            };
            let step = timeframe.duration();

            let mut next = Vec::new();
            {
                let mut rng = self.rng.lock().await;
                // a bucket is closed once its end has passed
                while prev.timestamp + step + step <= now && next.len() < MAX_PAPER_HISTORY {
                    let open = prev.close;
                    let close = open * (1.0 + rng.gen_range(-0.004..0.004));
                    let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
                    let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
                    let volume = rng.gen_range(1.0..20.0);
                    let candle = Candle::new(prev.timestamp + step, open, high, low, close, volume);
                    next.push(candle.clone());
                    prev = candle;
                }
            }

            if !next.is_empty() {
                appended += next.len();
                self.exchange.append_candles(&symbol, timeframe, next).await;
            }
        }

        if appended > 0 {
            tracing::debug!(appended, "Paper market advanced");
        }
        appended
    }
}
