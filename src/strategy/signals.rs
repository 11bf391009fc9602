use serde::{Deserialize, Serialize};

use crate::config::{check_ordered, check_range};
use crate::error::ConfigError;
use crate::models::{FeatureRecord, TrendSignal};

/// Configuration for the RSI + MA crossover trend signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TrendConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("trend.rsi_oversold", self.rsi_oversold, 0.0, 100.0, "[0, 100]")?;
        check_range(
            "trend.rsi_overbought",
            self.rsi_overbought,
            0.0,
            100.0,
            "[0, 100]",
        )?;
        check_ordered(
            "trend.rsi_oversold",
            self.rsi_oversold,
            "trend.rsi_overbought",
            self.rsi_overbought,
        )?;
        Ok(())
    }
}

/// Base trend direction for one record
///
/// Returns `None` when neither the entry nor the exit condition holds, in
/// which case the caller keeps its previous direction.
///
/// - LONG: RSI below oversold AND fast MA above slow MA
/// - CASH: RSI above overbought AND fast MA below slow MA
pub fn trend_signal(record: &FeatureRecord, config: &TrendConfig) -> Option<TrendSignal> {
    let rsi_oversold = record.rsi < config.rsi_oversold;
    let rsi_overbought = record.rsi > config.rsi_overbought;

    if rsi_oversold && record.ma_crossover > 0 {
        tracing::debug!(
            rsi = record.rsi,
            "LONG conditions: RSI<{}, MA↑",
            config.rsi_oversold
        );
        Some(TrendSignal::Long)
    } else if rsi_overbought && record.ma_crossover < 0 {
        tracing::debug!(
            rsi = record.rsi,
            "CASH conditions: RSI>{}, MA↓",
            config.rsi_overbought
        );
        Some(TrendSignal::Cash)
    } else {
        None
    }
}

/// Volatility-target position size: `min(target / vol, max)`
///
/// Zero, negative or undefined volatility sizes at `max_position_size`.
pub fn volatility_target_size(
    current_volatility: f64,
    volatility_target: f64,
    max_position_size: f64,
) -> f64 {
    if current_volatility.is_nan() || current_volatility <= 0.0 {
        return max_position_size;
    }
    (volatility_target / current_volatility).min(max_position_size)
}
