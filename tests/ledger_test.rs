use chrono::{Duration, TimeZone, Utc};
use quantdesk::execution::{Fill, OrderSide};
use quantdesk::ledger::PositionLedger;
use quantdesk::persistence::{FillStore, MemoryStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

const ACCOUNT: &str = "acc-1";
const SYMBOL: &str = "ETH/KRW";

fn fill(n: i64, side: OrderSide, amount: Decimal, price: Decimal) -> Fill {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    Fill {
        id: Uuid::new_v4(),
        order_id: Uuid::new_v4(),
        external_id: format!("trade-{}", n),
        account_id: ACCOUNT.to_string(),
        symbol: SYMBOL.to_string(),
        side,
        price,
        amount,
        fee: dec!(0),
        fee_currency: "KRW".to_string(),
        timestamp: start + Duration::minutes(n),
    }
}

fn history() -> Vec<Fill> {
    vec![
        fill(1, OrderSide::Buy, dec!(2), dec!(3000000)),
        fill(2, OrderSide::Buy, dec!(2), dec!(3200000)),
        fill(3, OrderSide::Sell, dec!(1), dec!(3400000)),
        fill(4, OrderSide::Buy, dec!(1), dec!(3100000)),
        fill(5, OrderSide::Sell, dec!(2), dec!(3000000)),
    ]
}

#[tokio::test]
async fn test_rebuild_matches_incremental_and_is_idempotent() {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryStore::new());
    let ledger = PositionLedger::new(store.clone(), store.clone());

    for f in history() {
        assert!(tokio_test::assert_ok!(store.append_fill(&f).await));
        tokio_test::assert_ok!(ledger.apply_fill(&f).await);
    }
    let incremental = ledger.position(ACCOUNT, SYMBOL).await.unwrap();

    // buys: 2 @ 3.0M, 2 @ 3.2M -> avg 3.1M; sell 1 @ 3.4M -> +0.3M
    // buy 1 @ 3.1M keeps avg 3.1M; sell 2 @ 3.0M -> -0.2M
    assert_eq!(incremental.amount, dec!(2));
    assert_eq!(incremental.entry_price, dec!(3100000));
    assert_eq!(incremental.realized_pnl, dec!(100000));

    let first = ledger.rebuild(ACCOUNT, SYMBOL).await.unwrap();
    let second = ledger.rebuild(ACCOUNT, SYMBOL).await.unwrap();

    assert_eq!(first.amount, incremental.amount);
    assert_eq!(first.entry_price, incremental.entry_price);
    assert_eq!(first.realized_pnl, incremental.realized_pnl);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_duplicate_fill_is_stored_once() {
    let store = Arc::new(MemoryStore::new());
    let f = fill(1, OrderSide::Buy, dec!(1), dec!(3000000));

    assert!(store.append_fill(&f).await.unwrap());
    let mut replay = f.clone();
    replay.id = Uuid::new_v4();
    assert!(!store.append_fill(&replay).await.unwrap());

    let ledger = PositionLedger::new(store.clone(), store.clone());
    let position = ledger.rebuild(ACCOUNT, SYMBOL).await.unwrap();
    assert_eq!(position.amount, dec!(1));
}

#[tokio::test]
async fn test_flat_after_full_exit() {
    let store = Arc::new(MemoryStore::new());
    let ledger = PositionLedger::new(store.clone(), store.clone());

    for f in [
        fill(1, OrderSide::Buy, dec!(1), dec!(3000000)),
        fill(2, OrderSide::Sell, dec!(1), dec!(3300000)),
    ] {
        store.append_fill(&f).await.unwrap();
        ledger.apply_fill(&f).await.unwrap();
    }

    let position = ledger.rebuild(ACCOUNT, SYMBOL).await.unwrap();
    assert_eq!(position.amount, Decimal::ZERO);
    assert!(!position.is_open);
    assert_eq!(position.realized_pnl, dec!(300000));
    assert!(ledger.open_positions(ACCOUNT).await.unwrap().is_empty());
}
