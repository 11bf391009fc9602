use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::PriceBar;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MarketScenario {
    /// Steady uptrend with noise (+0.1% daily average)
    Uptrend,
    /// Steady downtrend with noise (-0.1% daily average)
    Downtrend,
    /// Mean-reverting chop around the starting price
    Sideways,
    /// Large daily swings (±5%)
    Volatile,
    /// Calm uptrend, canary index breaks first, then a fast 40% crash and slow recovery
    FlashCrash,
    /// Grinding 45% decline to exercise the drawdown breaker
    DrawdownTest,
}

impl MarketScenario {
    pub fn all() -> [MarketScenario; 6] {
        [
            MarketScenario::Uptrend,
            MarketScenario::Downtrend,
            MarketScenario::Sideways,
            MarketScenario::Volatile,
            MarketScenario::FlashCrash,
            MarketScenario::DrawdownTest,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            MarketScenario::Uptrend => "📈 Uptrend",
            MarketScenario::Downtrend => "📉 Downtrend",
            MarketScenario::Sideways => "↔️  Sideways",
            MarketScenario::Volatile => "⚡ Volatile (±5% swings)",
            MarketScenario::FlashCrash => "💥 Flash Crash (canary leads)",
            MarketScenario::DrawdownTest => "🕳️  Drawdown Test (-45%)",
        }
    }
}

/// Daily asset and canary-index returns for one day
struct DayMove {
    asset: f64,
    index: f64,
}

/// Generates aligned daily asset/index closes for backtesting
///
/// Every generator seeded the same way produces the same bars.
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_index: f64,
    start: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
            base_index: 4000.0,
            start: Utc
                .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    /// Generate `num_days` daily bars for a scenario
    pub fn generate(&mut self, scenario: MarketScenario, num_days: usize) -> Vec<PriceBar> {
        let mut bars = Vec::with_capacity(num_days);
        let mut price = self.base_price;
        let mut index = self.base_index;

        for day in 0..num_days {
            if day > 0 {
                let moves = self.day_move(scenario, day, num_days, price);
                price = (price * (1.0 + moves.asset)).max(0.01);
                index = (index * (1.0 + moves.index)).max(0.01);
            }

            bars.push(PriceBar {
                timestamp: self.start + Duration::days(day as i64),
                close: price,
                index_close: index,
            });
        }

        bars
    }

    fn day_move(
        &mut self,
        scenario: MarketScenario,
        day: usize,
        num_days: usize,
        price: f64,
    ) -> DayMove {
        match scenario {
            MarketScenario::Uptrend => self.correlated(0.001, 0.01),
            MarketScenario::Downtrend => self.correlated(-0.001, 0.01),
            MarketScenario::Sideways => {
                // 10% pull back toward the starting price
                let reversion = (self.base_price - price) / price * 0.1;
                self.correlated(reversion, 0.01)
            }
            MarketScenario::Volatile => self.correlated(0.0, 0.05),
            MarketScenario::FlashCrash => self.flash_crash(day, num_days),
            MarketScenario::DrawdownTest => {
                let half = num_days / 2;
                if day < half {
                    self.correlated(0.001, 0.008)
                } else {
                    // -45% spread evenly over the second half
                    let drift = 0.55f64.powf(1.0 / (num_days - half) as f64) - 1.0;
                    self.correlated(drift, 0.005)
                }
            }
        }
    }

    fn flash_crash(&mut self, day: usize, num_days: usize) -> DayMove {
        let crash_start = num_days * 55 / 100;
        let crash_days = 6;
        let recovery_end = crash_start + crash_days + 40;

        if (crash_start.saturating_sub(2)..crash_start).contains(&day) {
            // Index breaks down before the asset
            DayMove {
                asset: self.rng.gen_range(-0.01..0.0),
                index: self.rng.gen_range(-0.05..-0.035),
            }
        } else if (crash_start..crash_start + crash_days).contains(&day) {
            // 0.92^6 ≈ 0.61
            DayMove {
                asset: -0.08 + self.rng.gen_range(-0.01..0.01),
                index: -0.02 + self.rng.gen_range(-0.01..0.01),
            }
        } else if (crash_start + crash_days..recovery_end).contains(&day) {
            self.correlated(0.006, 0.012)
        } else {
            self.correlated(0.0015, 0.008)
        }
    }

    /// Asset return with a shared market component that also drives the index
    fn correlated(&mut self, drift: f64, volatility: f64) -> DayMove {
        let market = self.rng.gen_range(-volatility..volatility);
        let idiosyncratic = self.rng.gen_range(-volatility..volatility) * 0.5;
        let index_noise = self.rng.gen_range(-0.002..0.002);

        DayMove {
            asset: drift + market + idiosyncratic,
            index: drift * 0.5 + market * 0.6 + index_noise,
        }
    }
}
