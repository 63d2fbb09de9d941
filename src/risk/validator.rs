use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::RiskPolicy;
use crate::execution::OrderSide;

/// Pre-trade checks in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskCheck {
    OrderSize,
    DailyLoss,
    MaxPosition,
    MaxOpenOrders,
}

impl RiskCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCheck::OrderSize => "orderSize",
            RiskCheck::DailyLoss => "dailyLoss",
            RiskCheck::MaxPosition => "maxPosition",
            RiskCheck::MaxOpenOrders => "maxOpenOrders",
        }
    }
}

impl fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The order being considered
#[derive(Debug, Clone, PartialEq)]
pub struct OrderProposal {
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    /// Limit price, or an estimate for market orders
    pub price: Option<Decimal>,
}

impl OrderProposal {
    /// Notional value; without a price the bare amount is used
    pub fn value(&self) -> Decimal {
        match self.price {
            Some(price) if price > Decimal::ZERO => self.amount * price,
            _ => self.amount,
        }
    }
}

/// What the checks need to know about the account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountRiskState {
    /// Today's realized losses as a positive number
    pub daily_realized_loss: Decimal,
    /// Cost basis of the existing position in the proposal's symbol
    pub position_value: Decimal,
    /// Orders in NEW, OPEN or PARTIAL
    pub open_orders: usize,
}

/// Per-check outcome; checks after the first failure stay `true`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskChecks {
    pub order_size: bool,
    pub daily_loss: bool,
    pub max_position: bool,
    pub max_open_orders: bool,
}

impl Default for RiskChecks {
    fn default() -> Self {
        Self {
            order_size: true,
            daily_loss: true,
            max_position: true,
            max_open_orders: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskCheckResult {
    pub passed: bool,
    pub failing_check: Option<RiskCheck>,
    pub reason: Option<String>,
    pub checks: RiskChecks,
}

impl RiskCheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failing_check: None,
            reason: None,
            checks: RiskChecks::default(),
        }
    }

    fn fail(check: RiskCheck, reason: String) -> Self {
        let mut checks = RiskChecks::default();
        match check {
            RiskCheck::OrderSize => checks.order_size = false,
            RiskCheck::DailyLoss => checks.daily_loss = false,
            RiskCheck::MaxPosition => checks.max_position = false,
            RiskCheck::MaxOpenOrders => checks.max_open_orders = false,
        }
        Self {
            passed: false,
            failing_check: Some(check),
            reason: Some(reason),
            checks,
        }
    }
}

/// Run the four checks in order, stopping at the first failure
pub fn validate(
    proposal: &OrderProposal,
    policy: &RiskPolicy,
    state: &AccountRiskState,
) -> RiskCheckResult {
    let order_value = proposal.value();

    if order_value > policy.max_order_value {
        return RiskCheckResult::fail(
            RiskCheck::OrderSize,
            format!(
                "Order size {} exceeds max {}",
                order_value, policy.max_order_value
            ),
        );
    }

    if state.daily_realized_loss >= policy.max_daily_loss {
        return RiskCheckResult::fail(
            RiskCheck::DailyLoss,
            format!(
                "Daily loss {} reached max {}",
                state.daily_realized_loss, policy.max_daily_loss
            ),
        );
    }

    if proposal.side == OrderSide::Buy {
        let new_value = state.position_value + order_value;
        if new_value > policy.max_position_value {
            return RiskCheckResult::fail(
                RiskCheck::MaxPosition,
                format!(
                    "Position value {} would exceed max {}",
                    new_value, policy.max_position_value
                ),
            );
        }
    }

    if state.open_orders >= policy.max_open_orders as usize {
        return RiskCheckResult::fail(
            RiskCheck::MaxOpenOrders,
            format!(
                "Open orders count {} reached max {}",
                state.open_orders, policy.max_open_orders
            ),
        );
    }

    RiskCheckResult::pass()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(amount: Decimal, price: Decimal) -> OrderProposal {
        OrderProposal {
            symbol: "BTC/KRW".to_string(),
            side: OrderSide::Buy,
            amount,
            price: Some(price),
        }
    }

    #[test]
    fn test_order_size_rejected() {
        let policy = RiskPolicy {
            max_order_value: dec!(1000000),
            ..Default::default()
        };
        let result = validate(
            &buy(dec!(1), dec!(50000000)),
            &policy,
            &AccountRiskState::default(),
        );

        assert!(!result.passed);
        assert_eq!(result.failing_check, Some(RiskCheck::OrderSize));
        assert!(!result.checks.order_size);
        assert!(result.checks.daily_loss);
        assert!(result.reason.unwrap().contains("exceeds"));
    }

    #[test]
    fn test_all_checks_pass() {
        let result = validate(
            &buy(dec!(0.01), dec!(50000000)),
            &RiskPolicy::default(),
            &AccountRiskState::default(),
        );
        assert_eq!(result, RiskCheckResult::pass());
    }

    #[test]
    fn test_daily_loss_at_limit_blocks() {
        let state = AccountRiskState {
            daily_realized_loss: dec!(1000000),
            ..Default::default()
        };
        let result = validate(&buy(dec!(0.01), dec!(100)), &RiskPolicy::default(), &state);
        assert_eq!(result.failing_check, Some(RiskCheck::DailyLoss));
    }

    #[test]
    fn test_position_limit_only_applies_to_buys() {
        let state = AccountRiskState {
            position_value: dec!(45000000),
            ..Default::default()
        };
        let proposal = buy(dec!(0.1), dec!(60000000));
        let result = validate(&proposal, &RiskPolicy::default(), &state);
        assert_eq!(result.failing_check, Some(RiskCheck::MaxPosition));

        let sell = OrderProposal {
            side: OrderSide::Sell,
            ..proposal
        };
        assert!(validate(&sell, &RiskPolicy::default(), &state).passed);
    }

    #[test]
    fn test_open_orders_limit() {
        let state = AccountRiskState {
            open_orders: 10,
            ..Default::default()
        };
        let result = validate(&buy(dec!(0.01), dec!(100)), &RiskPolicy::default(), &state);
        assert_eq!(result.failing_check, Some(RiskCheck::MaxOpenOrders));

        let state = AccountRiskState {
            open_orders: 9,
            ..Default::default()
        };
        assert!(validate(&buy(dec!(0.01), dec!(100)), &RiskPolicy::default(), &state).passed);
    }

    #[test]
    fn test_first_failure_wins() {
        let policy = RiskPolicy {
            max_order_value: dec!(1),
            ..Default::default()
        };
        let state = AccountRiskState {
            daily_realized_loss: dec!(999999999),
            position_value: dec!(999999999),
            open_orders: 100,
        };
        let result = validate(&buy(dec!(1), dec!(100)), &policy, &state);
        assert_eq!(result.failing_check, Some(RiskCheck::OrderSize));
        assert!(result.checks.daily_loss && result.checks.max_position && result.checks.max_open_orders);
    }

    #[test]
    fn test_value_without_price_uses_amount() {
        let proposal = OrderProposal {
            symbol: "BTC/KRW".to_string(),
            side: OrderSide::Buy,
            amount: dec!(3),
            price: None,
        };
        assert_eq!(proposal.value(), dec!(3));
    }
}
