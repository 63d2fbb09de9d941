use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::execution::OrderSide;

/// Spot only: positions are long or empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
}

/// Holdings of one account in one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub amount: Decimal,
    /// Weighted-average cost of the open amount
    pub entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub is_open: bool,
    /// Realized P&L booked on `pnl_date` (UTC)
    pub daily_realized_pnl: Decimal,
    pub pnl_date: Option<NaiveDate>,
    pub last_fill_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(account_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            symbol: symbol.into(),
            side: PositionSide::Long,
            amount: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            is_open: false,
            daily_realized_pnl: Decimal::ZERO,
            pnl_date: None,
            last_fill_at: None,
        }
    }

    /// Apply one fill and return the P&L it realized.
    ///
    /// Buys fold into the weighted-average entry price. Sells close at most
    /// the held amount and book `(price - entry) * sold - fee`. A sell
    /// against an empty position changes nothing.
    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        fee: Decimal,
        at: DateTime<Utc>,
    ) -> Decimal {
        self.last_fill_at = Some(at);

        match side {
            OrderSide::Buy => {
                let total = self.amount + amount;
                if total > Decimal::ZERO {
                    self.entry_price = (self.entry_price * self.amount + price * amount) / total;
                }
                self.amount = total;
                self.side = PositionSide::Long;
                self.is_open = true;
                Decimal::ZERO
            }
            OrderSide::Sell => {
                if self.amount <= Decimal::ZERO {
                    tracing::warn!(
                        account_id = %self.account_id,
                        symbol = %self.symbol,
                        amount = %amount,
                        "Sell fill against empty position ignored"
                    );
                    return Decimal::ZERO;
                }

                let sold = amount.min(self.amount);
                let pnl = (price - self.entry_price) * sold - fee;
                self.realized_pnl += pnl;
                self.book_daily(pnl, at.date_naive());
                self.amount -= sold;

                if self.amount.is_zero() {
                    self.is_open = false;
                }
                pnl
            }
        }
    }

    fn book_daily(&mut self, pnl: Decimal, day: NaiveDate) {
        if self.pnl_date != Some(day) {
            self.pnl_date = Some(day);
            self.daily_realized_pnl = Decimal::ZERO;
        }
        self.daily_realized_pnl += pnl;
    }

    /// Realized P&L booked on `day`
    pub fn realized_on(&self, day: NaiveDate) -> Decimal {
        if self.pnl_date == Some(day) {
            self.daily_realized_pnl
        } else {
            Decimal::ZERO
        }
    }

    /// Cost basis of the open amount
    pub fn value(&self) -> Decimal {
        self.amount * self.entry_price
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        if self.amount.is_zero() || self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.entry_price) * self.amount
    }

    pub fn unrealized_pnl_percent(&self, current_price: Decimal) -> Decimal {
        if self.amount.is_zero() || self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_weighted_average_entry() {
        let mut position = Position::new("acc-1", "BTC/KRW");
        position.apply_fill(OrderSide::Buy, dec!(0.1), dec!(50000000), dec!(0), at(1));
        position.apply_fill(OrderSide::Buy, dec!(0.1), dec!(60000000), dec!(0), at(2));

        assert_eq!(position.entry_price, dec!(55000000));
        assert_eq!(position.amount, dec!(0.2));
        assert!(position.is_open);
    }

    #[test]
    fn test_partial_sell_realizes_pnl() {
        let mut position = Position::new("acc-1", "BTC/KRW");
        position.apply_fill(OrderSide::Buy, dec!(0.2), dec!(50000000), dec!(0), at(1));

        let pnl = position.apply_fill(OrderSide::Sell, dec!(0.1), dec!(55000000), dec!(1000), at(2));

        assert_eq!(pnl, dec!(499000));
        assert_eq!(position.realized_pnl, dec!(499000));
        assert_eq!(position.amount, dec!(0.1));
        assert_eq!(position.entry_price, dec!(50000000));
        assert!(position.is_open);
    }

    #[test]
    fn test_full_sell_closes_position() {
        let mut position = Position::new("acc-1", "BTC/KRW");
        position.apply_fill(OrderSide::Buy, dec!(1), dec!(100), dec!(0), at(1));
        position.apply_fill(OrderSide::Sell, dec!(2), dec!(90), dec!(0), at(2));

        // only the held amount can be sold
        assert_eq!(position.amount, Decimal::ZERO);
        assert_eq!(position.realized_pnl, dec!(-10));
        assert!(!position.is_open);
    }

    #[test]
    fn test_sell_on_empty_position_is_ignored() {
        let mut position = Position::new("acc-1", "BTC/KRW");
        let pnl = position.apply_fill(OrderSide::Sell, dec!(1), dec!(100), dec!(5), at(1));
        assert_eq!(pnl, Decimal::ZERO);
        assert_eq!(position.realized_pnl, Decimal::ZERO);
        assert!(!position.is_open);
    }

    #[test]
    fn test_daily_pnl_rolls_over() {
        let mut position = Position::new("acc-1", "BTC/KRW");
        position.apply_fill(OrderSide::Buy, dec!(2), dec!(100), dec!(0), at(1));
        position.apply_fill(OrderSide::Sell, dec!(1), dec!(90), dec!(0), at(2));

        let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        position.apply_fill(OrderSide::Sell, dec!(1), dec!(95), dec!(0), next_day);

        assert_eq!(position.realized_on(at(0).date_naive()), Decimal::ZERO);
        assert_eq!(position.realized_on(next_day.date_naive()), dec!(-5));
        assert_eq!(position.realized_pnl, dec!(-15));
    }

    #[test]
    fn test_unrealized_pnl() {
        let mut position = Position::new("acc-1", "BTC/KRW");
        assert_eq!(position.unrealized_pnl(dec!(100)), Decimal::ZERO);
        assert_eq!(position.unrealized_pnl_percent(dec!(100)), Decimal::ZERO);

        position.apply_fill(OrderSide::Buy, dec!(2), dec!(100), dec!(0), at(1));
        assert_eq!(position.unrealized_pnl(dec!(110)), dec!(20));
        assert_eq!(position.unrealized_pnl_percent(dec!(110)), dec!(10));
    }
}
