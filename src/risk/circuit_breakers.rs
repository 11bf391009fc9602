use serde::{Deserialize, Serialize};

use crate::config::check_range;
use crate::error::ConfigError;
use crate::models::PortfolioSignal;

/// Position limits and the two unconditional safety overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RiskConfig {
    pub stop_loss_pct: f64,
    pub max_position_size: f64,
    pub volatility_target: f64,
    pub drawdown_breaker_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.05,        // -5% from entry
            max_position_size: 1.0,     // Fully invested at most
            volatility_target: 0.02,    // 2% daily
            drawdown_breaker_pct: 0.30, // -30% from peak equity
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "risk.stop_loss_pct",
            self.stop_loss_pct,
            f64::MIN_POSITIVE,
            1.0,
            "(0, 1]",
        )?;
        check_range(
            "risk.max_position_size",
            self.max_position_size,
            f64::MIN_POSITIVE,
            1.0,
            "(0, 1]",
        )?;
        check_range(
            "risk.volatility_target",
            self.volatility_target,
            f64::MIN_POSITIVE,
            1.0,
            "(0, 1]",
        )?;
        check_range(
            "risk.drawdown_breaker_pct",
            self.drawdown_breaker_pct,
            f64::MIN_POSITIVE,
            1.0,
            "(0, 1]",
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerTrip {
    StopLoss,
    MaxDrawdown,
}

/// Stop-loss and portfolio drawdown breaker
///
/// The stop-loss is evaluated fresh every step. The drawdown breaker latches:
/// once tripped it stays tripped until [`clear`](Self::clear) is called.
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    config: RiskConfig,
    drawdown_tripped: bool,
}

impl CircuitBreakers {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            drawdown_tripped: false,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn is_drawdown_tripped(&self) -> bool {
        self.drawdown_tripped
    }

    /// Unrealized loss since entry at or beyond the stop
    pub fn stop_loss_hit(&self, signal: &PortfolioSignal) -> bool {
        signal
            .position_return
            .map(|r| r <= -self.config.stop_loss_pct)
            .unwrap_or(false)
    }

    /// Check both overrides, latching the drawdown breaker when reached
    ///
    /// The drawdown breaker wins when both fire.
    pub fn check(&mut self, signal: &PortfolioSignal) -> Result<(), CircuitBreakerTrip> {
        if !self.drawdown_tripped && signal.drawdown >= self.config.drawdown_breaker_pct {
            self.drawdown_tripped = true;
            tracing::info!(
                "Drawdown breaker tripped at {:.1}% below peak",
                signal.drawdown * 100.0
            );
        }

        if self.drawdown_tripped {
            return Err(CircuitBreakerTrip::MaxDrawdown);
        }

        if self.stop_loss_hit(signal) {
            return Err(CircuitBreakerTrip::StopLoss);
        }

        Ok(())
    }

    pub fn clear(&mut self) {
        if self.drawdown_tripped {
            tracing::info!("Drawdown breaker cleared");
        }
        self.drawdown_tripped = false;
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

/// Equity and peak tracking owned by the backtester
#[derive(Debug, Clone)]
pub struct TradingState {
    pub portfolio_value: f64,
    pub peak_portfolio_value: f64,
}

impl TradingState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            portfolio_value: initial_capital,
            peak_portfolio_value: initial_capital,
        }
    }

    pub fn update_portfolio_value(&mut self, new_value: f64) {
        self.portfolio_value = new_value;
        if new_value > self.peak_portfolio_value {
            self.peak_portfolio_value = new_value;
        }
    }

    /// Fraction below peak equity
    pub fn drawdown(&self) -> f64 {
        if self.peak_portfolio_value <= 0.0 {
            return 0.0;
        }
        ((self.peak_portfolio_value - self.portfolio_value) / self.peak_portfolio_value).max(0.0)
    }
}
