use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Per-account pre-trade limits (quote currency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub max_order_value: Decimal,
    pub max_position_value: Decimal,
    pub max_daily_loss: Decimal,
    pub max_open_orders: u32,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_order_value: dec!(10000000),
            max_position_value: dec!(50000000),
            max_daily_loss: dec!(1000000),
            max_open_orders: 10,
        }
    }
}

/// Partial update; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicyUpdate {
    pub max_order_value: Option<Decimal>,
    pub max_position_value: Option<Decimal>,
    pub max_daily_loss: Option<Decimal>,
    pub max_open_orders: Option<u32>,
}

impl RiskPolicy {
    pub fn merged(&self, update: &RiskPolicyUpdate) -> RiskPolicy {
        RiskPolicy {
            max_order_value: update.max_order_value.unwrap_or(self.max_order_value),
            max_position_value: update.max_position_value.unwrap_or(self.max_position_value),
            max_daily_loss: update.max_daily_loss.unwrap_or(self.max_daily_loss),
            max_open_orders: update.max_open_orders.unwrap_or(self.max_open_orders),
        }
    }
}
