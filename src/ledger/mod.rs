// Position ledger: weighted-average cost basis and realized P&L per
// (account, symbol), derived purely from fills

pub mod position;
pub mod reconcile;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::TradingError;
use crate::execution::Fill;
use crate::persistence::{FillStore, PositionStore};
use crate::Result;

pub use position::{Position, PositionSide};
pub use reconcile::rebuild_position;

/// Position view with optional mark-to-market figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub is_open: bool,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub unrealized_pnl_percent: Option<Decimal>,
}

type PositionKey = (String, String);

/// Applies fills to stored positions.
///
/// Updates for the same (account, symbol) are serialized; different keys
/// proceed independently.
pub struct PositionLedger {
    positions: Arc<dyn PositionStore>,
    fills: Arc<dyn FillStore>,
    locks: Mutex<HashMap<PositionKey, Arc<Mutex<()>>>>,
}

impl PositionLedger {
    pub fn new(positions: Arc<dyn PositionStore>, fills: Arc<dyn FillStore>) -> Self {
        Self {
            positions,
            fills,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, account_id: &str, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((account_id.to_string(), symbol.to_string()))
            .or_default()
            .clone()
    }

    /// Fold a newly recorded fill into its position
    pub async fn apply_fill(&self, fill: &Fill) -> Result<Position> {
        let lock = self.key_lock(&fill.account_id, &fill.symbol).await;
        let _guard = lock.lock().await;

        let mut position = self
            .positions
            .find_position(&fill.account_id, &fill.symbol)
            .await?
            .unwrap_or_else(|| Position::new(&fill.account_id, &fill.symbol));

        let pnl = position.apply_fill(fill.side, fill.amount, fill.price, fill.fee, fill.timestamp);
        self.positions.save_position(&position).await?;

        tracing::info!(
            account_id = %fill.account_id,
            symbol = %fill.symbol,
            side = fill.side.as_str(),
            amount = %fill.amount,
            price = %fill.price,
            realized = %pnl,
            position = %position.amount,
            "Position updated"
        );

        Ok(position)
    }

    /// Recompute a position from its full fill history and store it
    pub async fn rebuild(&self, account_id: &str, symbol: &str) -> Result<Position> {
        let lock = self.key_lock(account_id, symbol).await;
        let _guard = lock.lock().await;

        let fills = self.fills.fills_for_position(account_id, symbol).await?;
        let position = rebuild_position(account_id, symbol, &fills);
        self.positions.save_position(&position).await?;

        tracing::info!(
            account_id,
            symbol,
            fills = fills.len(),
            amount = %position.amount,
            entry_price = %position.entry_price,
            realized_pnl = %position.realized_pnl,
            "🔁 Position reconciled"
        );

        Ok(position)
    }

    pub async fn position(&self, account_id: &str, symbol: &str) -> Result<Position> {
        self.positions
            .find_position(account_id, symbol)
            .await?
            .ok_or_else(|| TradingError::PositionNotFound {
                account_id: account_id.to_string(),
                symbol: symbol.to_string(),
            })
    }

    pub async fn positions(&self, account_id: &str) -> Result<Vec<Position>> {
        self.positions.positions_for_account(account_id).await
    }

    pub async fn open_positions(&self, account_id: &str) -> Result<Vec<Position>> {
        Ok(self
            .positions(account_id)
            .await?
            .into_iter()
            .filter(|p| p.is_open && p.amount > Decimal::ZERO)
            .collect())
    }

    pub async fn summary(
        &self,
        account_id: &str,
        symbol: &str,
        current_price: Option<Decimal>,
    ) -> Result<PositionSummary> {
        let position = self.position(account_id, symbol).await?;
        Ok(PositionSummary {
            symbol: position.symbol.clone(),
            amount: position.amount,
            entry_price: position.entry_price,
            realized_pnl: position.realized_pnl,
            is_open: position.is_open,
            current_price,
            unrealized_pnl: current_price.map(|p| position.unrealized_pnl(p)),
            unrealized_pnl_percent: current_price.map(|p| position.unrealized_pnl_percent(p)),
        })
    }

    /// Flatten a position by hand (e.g. after an off-platform sale).
    ///
    /// The next rebuild restores whatever the fills say.
    pub async fn close_position(&self, account_id: &str, symbol: &str) -> Result<Position> {
        let lock = self.key_lock(account_id, symbol).await;
        let _guard = lock.lock().await;

        let mut position = self.position(account_id, symbol).await?;
        position.amount = Decimal::ZERO;
        position.is_open = false;
        position.last_fill_at = Some(Utc::now());
        self.positions.save_position(&position).await?;

        tracing::info!(account_id, symbol, "Position closed manually");
        Ok(position)
    }
}
