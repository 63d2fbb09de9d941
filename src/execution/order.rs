use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TradingError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(TradingError::Storage(format!("unknown order side: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

impl FromStr for OrderType {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            other => Err(TradingError::Storage(format!("unknown order type: {}", other))),
        }
    }
}

/// Order lifecycle
///
/// ```text
/// NEW -> OPEN -> PARTIAL (repeatable) -> FILLED
/// NEW | OPEN | PARTIAL -> CANCELED
/// NEW | OPEN -> REJECTED
/// NEW | OPEN | PARTIAL -> EXPIRED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Open,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Open => "OPEN",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Counted against the open-orders risk limit
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, Open | Canceled | Rejected | Expired)
                | (Open, Partial | Filled | Canceled | Rejected | Expired)
                | (Partial, Partial | Filled | Canceled | Expired)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "OPEN" => Ok(OrderStatus::Open),
            "PARTIAL" => Ok(OrderStatus::Partial),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            other => Err(TradingError::Storage(format!("unknown order status: {}", other))),
        }
    }
}

/// Caller-side description of an order to place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    /// Limit price; ignored for market orders
    pub price: Option<Decimal>,
    /// Estimated execution price used to value market orders for risk checks
    pub reference_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            reference_price: None,
        }
    }

    pub fn limit(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            amount,
            price: Some(price),
            reference_price: None,
        }
    }

    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(TradingError::InvalidOrder(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.order_type == OrderType::Limit && !self.price.is_some_and(|p| p > Decimal::ZERO) {
            return Err(TradingError::InvalidOrder(
                "limit orders need a positive price".to_string(),
            ));
        }
        Ok(())
    }

    /// Price used to value the order: limit price, else the estimate
    pub fn valuation_price(&self) -> Option<Decimal> {
        match self.order_type {
            OrderType::Limit => self.price,
            OrderType::Market => self.reference_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub price: Option<Decimal>,
    pub fee: Decimal,
    pub external_order_id: Option<String>,
    /// Last execution failure, kept for operators after retries run out
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a fill did to an order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillApplied {
    /// Quantity credited to the order, capped at what was remaining
    pub credited: Decimal,
    /// Fill arrived after the order reached CANCELED or EXPIRED
    pub late: bool,
}

impl Order {
    pub fn new(request: &OrderRequest) -> Self {
        let now = Utc::now();
        let price = match request.order_type {
            OrderType::Limit => request.price,
            OrderType::Market => None,
        };
        Self {
            id: Uuid::new_v4(),
            account_id: request.account_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::New,
            amount: request.amount,
            filled: Decimal::ZERO,
            remaining: request.amount,
            price,
            fee: Decimal::ZERO,
            external_order_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.external_order_id.is_some()
    }

    /// Move to `next`, refusing anything the lifecycle does not allow
    pub fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TradingError::InvalidStateTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Credit an exchange fill.
    ///
    /// Live orders move to PARTIAL or FILLED. A fill that lands after a
    /// cancel or expiry is still credited (the trade happened) but the
    /// status is left alone. `filled + remaining == amount` always holds.
    pub fn apply_fill(&mut self, amount: Decimal, fee: Decimal) -> Result<FillApplied> {
        if amount <= Decimal::ZERO {
            return Err(TradingError::InvalidOrder(format!(
                "fill amount must be positive, got {}",
                amount
            )));
        }

        let late = matches!(self.status, OrderStatus::Canceled | OrderStatus::Expired);
        if !late {
            let target = if amount >= self.remaining {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            };
            if !self.status.can_transition_to(target) {
                return Err(TradingError::InvalidStateTransition {
                    order_id: self.id,
                    from: self.status,
                    to: target,
                });
            }
        }

        let credited = amount.min(self.remaining);
        if credited < amount {
            tracing::warn!(
                order_id = %self.id,
                fill = %amount,
                remaining = %self.remaining,
                "Fill exceeds remaining amount, crediting remainder only"
            );
        }

        self.filled += credited;
        self.remaining = self.amount - self.filled;
        self.fee += fee;
        self.updated_at = Utc::now();

        if late {
            tracing::warn!(
                order_id = %self.id,
                status = %self.status,
                credited = %credited,
                "Late fill reconciled on closed order"
            );
        } else if self.remaining.is_zero() {
            self.status = OrderStatus::Filled;
        } else {
            self.status = OrderStatus::Partial;
        }

        Ok(FillApplied { credited, late })
    }
}

/// One execution report against an order; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Exchange-assigned fill identifier, unique per exchange
    pub external_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub timestamp: DateTime<Utc>,
}
