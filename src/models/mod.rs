use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::regime::MarketRegime;

/// One aligned daily observation of the traded asset and the canary index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub index_close: f64,
}

/// Per-step indicator snapshot consumed by every engine component
///
/// Produced once per step by the feature pipeline and never mutated.
/// `vol_long` may be zero; consumers guard every ratio built on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRecord {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub ma_short: f64,
    pub duvol: f64,
    pub ncskew: f64,
    pub vol_short: f64,
    pub vol_long: f64,
    pub rsi: f64,
    pub ma_crossover: i8,
    pub canary: bool,
    pub recent_return: f64, // Trailing 5-day return
    pub index_return: f64,  // Canary index daily return
}

impl FeatureRecord {
    /// A neutral record: calm volatility, RSI 50, no crash signal
    pub fn neutral(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            price: 100.0,
            ma_short: 100.0,
            duvol: 0.0,
            ncskew: 0.0,
            vol_short: 0.02,
            vol_long: 0.02,
            rsi: 50.0,
            ma_crossover: 0,
            canary: false,
            recent_return: 0.0,
            index_return: 0.0,
        }
    }

    /// True when every numeric field holds a real value
    pub fn is_complete(&self) -> bool {
        [
            self.price,
            self.ma_short,
            self.duvol,
            self.ncskew,
            self.vol_short,
            self.vol_long,
            self.rsi,
            self.recent_return,
            self.index_return,
        ]
        .iter()
        .all(|v| !v.is_nan())
    }

    /// Short/long volatility ratio, `None` when the long leg is zero or undefined
    pub fn vol_ratio(&self) -> Option<f64> {
        if self.vol_long.is_nan() || self.vol_short.is_nan() || self.vol_long <= 0.0 {
            return None;
        }
        Some(self.vol_short / self.vol_long)
    }
}

/// Base trend-following direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendSignal {
    Long,
    Cash,
}

/// Why a step's target fraction was chosen
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    TrendSignal,
    CrashLiquidation,
    ProportionalReduction,
    RecoveryRamp,
    StopLoss,
    DrawdownBreaker,
}

/// Engine output for one time step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionDecision {
    pub timestamp: DateTime<Utc>,
    pub target_fraction: f64,
    pub reason: DecisionReason,
    pub regime: MarketRegime,
    pub crash_intensity: f64,
    pub degraded: bool, // Inputs were incomplete; previous fraction held
}

/// Portfolio state owned by the backtester and read by the engine each step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PortfolioSignal {
    /// Unrealized return of the open position since entry, `None` when flat
    pub position_return: Option<f64>,
    /// Fraction below peak equity (0.25 = 25% under the peak)
    pub drawdown: f64,
}
