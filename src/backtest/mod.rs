pub mod metrics;
pub mod portfolio;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, RegimeCounts, RoundTrip, TradeRecord, TradeSide};
pub use portfolio::{AssetSleeve, PortfolioResult, PortfolioRunner, SleeveResult};
pub use runner::{BacktestResult, BacktestRunner, EquityPoint};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};

use serde::{Deserialize, Serialize};

use crate::config::check_range;
use crate::error::ConfigError;

/// Execution and evaluation settings for a backtest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub slippage_pct: f64,   // Of traded value, per fill
    pub commission_pct: f64, // Of traded value, per fill
    /// Skip rebalances smaller than this fraction of equity (exits always fill)
    pub rebalance_threshold: f64,
    pub risk_free_rate: f64, // Annual
    pub trading_days: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            slippage_pct: 0.001,
            commission_pct: 0.0,
            rebalance_threshold: 0.05,
            risk_free_rate: 0.02,
            trading_days: 252,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "backtest.initial_capital",
            self.initial_capital,
            f64::MIN_POSITIVE,
            f64::MAX,
            "> 0",
        )?;
        check_range("backtest.slippage_pct", self.slippage_pct, 0.0, 0.1, "[0, 0.1]")?;
        check_range(
            "backtest.commission_pct",
            self.commission_pct,
            0.0,
            0.1,
            "[0, 0.1]",
        )?;
        check_range(
            "backtest.rebalance_threshold",
            self.rebalance_threshold,
            0.0,
            1.0,
            "[0, 1]",
        )?;
        check_range(
            "backtest.risk_free_rate",
            self.risk_free_rate,
            -1.0,
            1.0,
            "[-1, 1]",
        )?;
        check_range(
            "backtest.trading_days",
            self.trading_days as f64,
            1.0,
            366.0,
            "[1, 366]",
        )?;
        Ok(())
    }

    /// Slippage plus commission per unit of traded value
    pub fn cost_rate(&self) -> f64 {
        self.slippage_pct + self.commission_pct
    }

    /// Risk-free rate compounded down to one trading day
    pub fn daily_risk_free(&self) -> f64 {
        (1.0 + self.risk_free_rate).powf(1.0 / self.trading_days as f64) - 1.0
    }
}
