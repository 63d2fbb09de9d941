use chrono::Utc;
use quantdesk::collector::CandleCollector;
use quantdesk::execution::{
    Credentials, Exchange, ExchangeConnector, OrderRequest, OrderService, OrderSide, OrderStatus,
    PaperExchange, PaperExchangeFactory, PaperMarket, RetryPolicy, TaskQueue, EXECUTE_ORDER,
};
use quantdesk::ledger::PositionLedger;
use quantdesk::persistence::{CandleStore, MemoryStore, StaticCredentials};
use quantdesk::risk::{RiskPolicy, RiskService};
use quantdesk::{MarketKey, Timeframe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_simulated_market_feeds_collector_and_fills_orders() {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryStore::new());
    let exchange = Arc::new(PaperExchange::new("bithumb"));
    let market = PaperMarket::new(exchange.clone(), 42);
    market
        .open("BTC/KRW", Timeframe::M1, Vec::new(), 200, Utc::now())
        .await;

    println!("1. The collector stores candles from the simulated market");
    let collector = CandleCollector::new(exchange.clone(), store.clone());
    let stored = collector
        .fetch_and_save("BTC/KRW", Timeframe::M1, None, 100)
        .await
        .unwrap();
    assert_eq!(stored, 100);
    let key = MarketKey::new("bithumb", "BTC/KRW", Timeframe::M1);
    assert_eq!(store.latest_candles(&key, 500).await.unwrap().len(), 100);

    println!("2. A market order fills at the simulated price");
    let connector = Arc::new(ExchangeConnector::new(
        "bithumb",
        Arc::new(PaperExchangeFactory::new(exchange.clone())),
        Arc::new(StaticCredentials::new(HashMap::from([(
            "paper".to_string(),
            Credentials {
                api_key: "paper".to_string(),
                secret: "paper".to_string(),
            },
        )]))),
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
    queue.start().await.unwrap();

    let ticker = exchange.fetch_ticker("BTC/KRW").await.unwrap();
    let reference = Decimal::from_f64_retain(ticker.last).unwrap().round_dp(0);
    let order = orders
        .create_order(
            OrderRequest::market("paper", "BTC/KRW", OrderSide::Buy, dec!(0.01))
                .with_reference_price(reference),
        )
        .await
        .unwrap();
    queue
        .wait_until_settled(&format!("{}-{}", EXECUTE_ORDER, order.id))
        .await
        .unwrap();

    let order = orders.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    let position = ledger.position("paper", "BTC/KRW").await.unwrap();
    assert_eq!(position.amount, dec!(0.01));
    assert!(position.entry_price > Decimal::ZERO);
}
