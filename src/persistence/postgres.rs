use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{CandleStore, FillStore, OrderStore, PositionStore, RiskPolicyStore};
use crate::execution::{Fill, Order};
use crate::ledger::{Position, PositionSide};
use crate::models::{Candle, MarketKey};
use crate::risk::RiskPolicy;
use crate::Result;

/// Postgres-backed stores for candles, orders, fills, positions and policies
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn candle_from_row(row: &PgRow) -> Candle {
    Candle {
        timestamp: row.get("timestamp"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        volume: row.get("volume"),
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let side: String = row.get("side");
    let order_type: String = row.get("order_type");
    let status: String = row.get("status");

    Ok(Order {
        id: row.get("id"),
        account_id: row.get("account_id"),
        symbol: row.get("symbol"),
        side: side.parse()?,
        order_type: order_type.parse()?,
        status: status.parse()?,
        amount: row.get("amount"),
        filled: row.get("filled"),
        remaining: row.get("remaining"),
        price: row.get("price"),
        fee: row.get("fee"),
        external_order_id: row.get("external_order_id"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn fill_from_row(row: &PgRow) -> Result<Fill> {
    let side: String = row.get("side");

    Ok(Fill {
        id: row.get("id"),
        order_id: row.get("order_id"),
        external_id: row.get("external_id"),
        account_id: row.get("account_id"),
        symbol: row.get("symbol"),
        side: side.parse()?,
        price: row.get("price"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        fee_currency: row.get("fee_currency"),
        timestamp: row.get("timestamp"),
    })
}

fn position_from_row(row: &PgRow) -> Position {
    let pnl_date: Option<NaiveDate> = row.get("pnl_date");
    let last_fill_at: Option<DateTime<Utc>> = row.get("last_fill_at");

    Position {
        account_id: row.get("account_id"),
        symbol: row.get("symbol"),
        side: PositionSide::Long,
        amount: row.get("amount"),
        entry_price: row.get("entry_price"),
        realized_pnl: row.get("realized_pnl"),
        is_open: row.get("is_open"),
        daily_realized_pnl: row.get("daily_realized_pnl"),
        pnl_date,
        last_fill_at,
    }
}

const ORDER_COLUMNS: &str = "id, account_id, symbol, side, order_type, status, amount, filled, \
     remaining, price, fee, external_order_id, last_error, created_at, updated_at";

const FILL_COLUMNS: &str = "id, order_id, external_id, account_id, symbol, side, price, amount, \
     fee, fee_currency, timestamp";

const POSITION_COLUMNS: &str = "account_id, symbol, amount, entry_price, realized_pnl, is_open, \
     daily_realized_pnl, pnl_date, last_fill_at";

#[async_trait]
impl CandleStore for PostgresStore {
    async fn upsert_candles(&self, key: &MarketKey, candles: &[Candle]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (exchange, symbol, timeframe, timestamp, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (exchange, symbol, timeframe, timestamp) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume
                "#,
            )
            .bind(&key.exchange)
            .bind(&key.symbol)
            .bind(key.timeframe.as_str())
            .bind(candle.timestamp)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(market = %key, count = candles.len(), "Upserted candles");
        Ok(candles.len())
    }

    async fn find_candles(
        &self,
        key: &MarketKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM candles
            WHERE exchange = $1 AND symbol = $2 AND timeframe = $3
              AND timestamp >= $4 AND timestamp <= $5
            ORDER BY timestamp ASC
            "#,
        )
        .bind(&key.exchange)
        .bind(&key.symbol)
        .bind(key.timeframe.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(candle_from_row).collect())
    }

    async fn latest_candles(&self, key: &MarketKey, limit: usize) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM candles
            WHERE exchange = $1 AND symbol = $2 AND timeframe = $3
            ORDER BY timestamp DESC
            LIMIT $4
            "#,
        )
        .bind(&key.exchange)
        .bind(&key.symbol)
        .bind(key.timeframe.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candles: Vec<Candle> = rows.iter().map(candle_from_row).collect();
        candles.reverse();
        Ok(candles)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, account_id, symbol, side, order_type, status, amount, filled,
                remaining, price, fee, external_order_id, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                filled = EXCLUDED.filled,
                remaining = EXCLUDED.remaining,
                fee = EXCLUDED.fee,
                external_order_id = EXCLUDED.external_order_id,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id)
        .bind(&order.account_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.status.as_str())
        .bind(order.amount)
        .bind(order.filled)
        .bind(order.remaining)
        .bind(order.price)
        .bind(order.fee)
        .bind(&order.external_order_id)
        .bind(&order.last_error)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn orders_for_account(&self, account_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE account_id = $1 ORDER BY created_at ASC",
            ORDER_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn count_open_orders(&self, account_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE account_id = $1 AND status IN ('NEW', 'OPEN', 'PARTIAL')",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as usize)
    }
}

#[async_trait]
impl FillStore for PostgresStore {
    async fn append_fill(&self, fill: &Fill) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO fills (
                id, order_id, external_id, account_id, symbol, side, price, amount,
                fee, fee_currency, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(fill.id)
        .bind(fill.order_id)
        .bind(&fill.external_id)
        .bind(&fill.account_id)
        .bind(&fill.symbol)
        .bind(fill.side.as_str())
        .bind(fill.price)
        .bind(fill.amount)
        .bind(fill.fee)
        .bind(&fill.fee_currency)
        .bind(fill.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fills_for_order(&self, order_id: Uuid) -> Result<Vec<Fill>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fills WHERE order_id = $1 ORDER BY timestamp ASC",
            FILL_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fill_from_row).collect()
    }

    async fn fills_for_position(&self, account_id: &str, symbol: &str) -> Result<Vec<Fill>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fills WHERE account_id = $1 AND symbol = $2 ORDER BY timestamp ASC",
            FILL_COLUMNS
        ))
        .bind(account_id)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fill_from_row).collect()
    }
}

#[async_trait]
impl PositionStore for PostgresStore {
    async fn find_position(&self, account_id: &str, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE account_id = $1 AND symbol = $2",
            POSITION_COLUMNS
        ))
        .bind(account_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(position_from_row))
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                account_id, symbol, side, amount, entry_price, realized_pnl, is_open,
                daily_realized_pnl, pnl_date, last_fill_at
            )
            VALUES ($1, $2, 'long', $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (account_id, symbol) DO UPDATE SET
                amount = EXCLUDED.amount,
                entry_price = EXCLUDED.entry_price,
                realized_pnl = EXCLUDED.realized_pnl,
                is_open = EXCLUDED.is_open,
                daily_realized_pnl = EXCLUDED.daily_realized_pnl,
                pnl_date = EXCLUDED.pnl_date,
                last_fill_at = EXCLUDED.last_fill_at,
                updated_at = NOW()
            "#,
        )
        .bind(&position.account_id)
        .bind(&position.symbol)
        .bind(position.amount)
        .bind(position.entry_price)
        .bind(position.realized_pnl)
        .bind(position.is_open)
        .bind(position.daily_realized_pnl)
        .bind(position.pnl_date)
        .bind(position.last_fill_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn positions_for_account(&self, account_id: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE account_id = $1 ORDER BY symbol ASC",
            POSITION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(position_from_row).collect())
    }
}

#[async_trait]
impl RiskPolicyStore for PostgresStore {
    async fn find_policy(&self, account_id: &str) -> Result<Option<RiskPolicy>> {
        let row = sqlx::query(
            r#"
            SELECT max_order_value, max_position_value, max_daily_loss, max_open_orders
            FROM risk_policies
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let max_open_orders: i32 = row.get("max_open_orders");
            RiskPolicy {
                max_order_value: row.get::<Decimal, _>("max_order_value"),
                max_position_value: row.get::<Decimal, _>("max_position_value"),
                max_daily_loss: row.get::<Decimal, _>("max_daily_loss"),
                max_open_orders: max_open_orders.max(0) as u32,
            }
        }))
    }

    async fn save_policy(&self, account_id: &str, policy: &RiskPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_policies (
                account_id, max_order_value, max_position_value, max_daily_loss, max_open_orders
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE SET
                max_order_value = EXCLUDED.max_order_value,
                max_position_value = EXCLUDED.max_position_value,
                max_daily_loss = EXCLUDED.max_daily_loss,
                max_open_orders = EXCLUDED.max_open_orders,
                updated_at = NOW()
            "#,
        )
        .bind(account_id)
        .bind(policy.max_order_value)
        .bind(policy.max_position_value)
        .bind(policy.max_daily_loss)
        .bind(policy.max_open_orders as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{OrderRequest, OrderSide};
    use crate::models::Timeframe;
    use rust_decimal_macros::dec;

    // Requires a running Postgres (DATABASE_URL); run with --ignored
    #[tokio::test]
    #[ignore]
    async fn test_order_round_trip() {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let store = PostgresStore::connect(&url).await.unwrap();

        let mut order = Order::new(&OrderRequest::limit(
            "pg-test",
            "BTC/KRW",
            OrderSide::Buy,
            dec!(0.5),
            dec!(40000000),
        ));
        store.save_order(&order).await.unwrap();

        order.transition(crate::execution::OrderStatus::Open).unwrap();
        store.save_order(&order).await.unwrap();

        let loaded = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, order.status);
        assert_eq!(loaded.amount, dec!(0.5));
        assert!(store.count_open_orders("pg-test").await.unwrap() >= 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_candle_upsert() {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let store = PostgresStore::connect(&url).await.unwrap();
        let key = MarketKey::new("test", "BTC/KRW", Timeframe::M1);

        let candle = Candle::new(Utc::now(), 1.0, 2.0, 0.5, 1.5, 10.0);
        store.upsert_candles(&key, &[candle.clone()]).await.unwrap();
        store.upsert_candles(&key, &[candle]).await.unwrap();

        let latest = store.latest_candles(&key, 1).await.unwrap();
        assert_eq!(latest.len(), 1);
    }
}
