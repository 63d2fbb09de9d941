use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{Candle, Timeframe};

/// Price paths the generator can produce
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketScenario {
    /// Steady drift up with light noise
    Uptrend,
    /// Steady drift down with light noise
    Downtrend,
    /// Mean-reverting chop around the base price
    Sideways,
    /// Flat, then a sharp sell-off over `dip_start..dip_bottom`, then a
    /// rebound that ends at `recovered`, then flat again
    DipAndRecovery {
        dip_start: usize,
        dip_bottom: usize,
        recovered: usize,
    },
}

/// Deterministic candle generator for backtests and tests.
///
/// The same seed always yields the same candles, starting 2024-01-01 UTC.
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    start: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 50_000_000.0,
            base_volume: 10.0,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        count: usize,
        timeframe: Timeframe,
    ) -> Vec<Candle> {
        let step = timeframe.duration();
        let mut price = self.base_price;
        let mut candles = Vec::with_capacity(count);

        for i in 0..count {
            let noise = self.rng.gen_range(-0.001..0.001);
            let change = match scenario {
                MarketScenario::Uptrend => 0.002 + noise,
                MarketScenario::Downtrend => -0.002 + noise,
                MarketScenario::Sideways => {
                    (self.base_price - price) / price * 0.1 + self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::DipAndRecovery {
                    dip_start,
                    dip_bottom,
                    recovered,
                } => {
                    if (dip_start..dip_bottom).contains(&i) {
                        -0.02 + noise
                    } else if (dip_bottom..recovered).contains(&i) {
                        0.02 + noise
                    } else {
                        noise
                    }
                }
            };
            price *= 1.0 + change;

            let timestamp = self.start + step * i as i32;
            candles.push(self.candle(timestamp, price));
        }

        candles
    }

    /// OHLC around a close, with `low <= open, close <= high`
    fn candle(&mut self, timestamp: DateTime<Utc>, close: f64) -> Candle {
        let spread = 0.002;
        let high = close * (1.0 + self.rng.gen_range(0.0..spread));
        let low = close * (1.0 - self.rng.gen_range(0.0..spread));
        let open = (close * (1.0 + self.rng.gen_range(-spread..spread))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle::new(timestamp, open, high, low, close, volume)
    }
}
