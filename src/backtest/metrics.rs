use serde::{Deserialize, Serialize};

use super::simulator::BacktestTrade;

const TRADING_DAYS: f64 = 252.0;

/// Performance summary of a backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetrics {
    // Capital
    pub start_capital: f64,
    pub end_capital: f64,
    pub total_return: f64,
    pub total_return_percent: f64,

    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub loss_rate: f64,

    // P&L distribution
    pub avg_win: f64,
    /// Magnitude of the average losing trade
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub total_fees: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,

    pub avg_holding_minutes: f64,
}

impl BacktestMetrics {
    pub fn from_trades(trades: &[BacktestTrade], start_capital: f64) -> Self {
        if trades.is_empty() {
            return Self::empty(start_capital);
        }

        let total_trades = trades.len();
        let total_return: f64 = trades.iter().map(|t| t.pnl).sum();
        let end_capital = start_capital + total_return;

        let wins: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p < 0.0).collect();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|p| p.abs()).sum();

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            gross_loss / losses.len() as f64
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_percent) = Self::drawdown(trades, start_capital);

        Self {
            start_capital,
            end_capital,
            total_return,
            total_return_percent: percent_of(total_return, start_capital),
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / total_trades as f64 * 100.0,
            loss_rate: losses.len() as f64 / total_trades as f64 * 100.0,
            avg_win,
            avg_loss,
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
            total_fees: trades.iter().map(|t| t.fees).sum(),
            max_drawdown,
            max_drawdown_percent,
            sharpe_ratio: Self::sharpe(trades),
            avg_holding_minutes: trades.iter().map(|t| t.holding_minutes() as f64).sum::<f64>()
                / total_trades as f64,
        }
    }

    fn empty(start_capital: f64) -> Self {
        Self {
            start_capital,
            end_capital: start_capital,
            total_return: 0.0,
            total_return_percent: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            loss_rate: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            profit_factor: 0.0,
            total_fees: 0.0,
            max_drawdown: 0.0,
            max_drawdown_percent: 0.0,
            sharpe_ratio: 0.0,
            avg_holding_minutes: 0.0,
        }
    }

    /// Largest peak-to-trough fall of equity, absolute and as % of that peak
    fn drawdown(trades: &[BacktestTrade], start_capital: f64) -> (f64, f64) {
        let mut peak = start_capital;
        let mut equity = start_capital;
        let mut max_dd = 0.0;
        let mut max_dd_pct = 0.0;

        for trade in trades {
            equity += trade.pnl;
            peak = peak.max(equity);

            let dd = peak - equity;
            if dd > max_dd {
                max_dd = dd;
                max_dd_pct = percent_of(dd, peak);
            }
        }

        (max_dd, max_dd_pct)
    }

    /// Annualized Sharpe over per-trade returns, risk-free rate 0
    fn sharpe(trades: &[BacktestTrade]) -> f64 {
        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_percent).collect();
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev > 0.0 {
            mean / std_dev * TRADING_DAYS.sqrt()
        } else {
            0.0
        }
    }

    pub fn print_report(&self) {
        println!("\n=== BACKTEST REPORT ===\n");

        println!("📊 CAPITAL");
        println!("  Start:           {:.2}", self.start_capital);
        println!("  End:             {:.2}", self.end_capital);
        println!(
            "  Return:          {:.2} ({:+.2}%)",
            self.total_return, self.total_return_percent
        );
        println!("  Fees paid:       {:.2}", self.total_fees);

        println!("\n📈 TRADES");
        println!("  Total:           {}", self.total_trades);
        println!(
            "  Winning:         {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!(
            "  Losing:          {} ({:.1}%)",
            self.losing_trades, self.loss_rate
        );

        if self.total_trades > 0 {
            println!("  Avg win:         {:.2}", self.avg_win);
            println!("  Avg loss:        {:.2}", self.avg_loss);
            println!("  Largest win:     {:.2}", self.largest_win);
            println!("  Largest loss:    {:.2}", self.largest_loss);
            println!("  Profit factor:   {:.2}", self.profit_factor);
            println!("  Avg holding:     {:.1} h", self.avg_holding_minutes / 60.0);

            println!("\n⚠️  RISK");
            println!(
                "  Max drawdown:    {:.2} ({:.2}%)",
                self.max_drawdown, self.max_drawdown_percent
            );
            println!("  Sharpe ratio:    {:.2}", self.sharpe_ratio);
        }
        println!();
    }
}

fn percent_of(value: f64, base: f64) -> f64 {
    if base != 0.0 {
        value / base * 100.0
    } else {
        0.0
    }
}
