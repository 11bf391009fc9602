//! Run configuration
//!
//! One immutable [`StrategyConfig`] is built and validated before the first
//! step and handed to every component by value. Unknown keys are rejected.
//!
//! [`AppConfig::load`] layers an optional TOML file under environment
//! overrides of the form `CRASHGUARD__RISK__STOP_LOSS_PCT=0.04`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backtest::BacktestConfig;
use crate::error::ConfigError;
use crate::features::FeatureConfig;
use crate::intensity::IntensityConfig;
use crate::recovery::RecoveryConfig;
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::strategy::signals::TrendConfig;

/// Which sizing path drives the target fraction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// Discrete Normal/Crash/Recovery regimes with volatility-target sizing
    #[default]
    Regime,
    /// Continuous crash intensity with proportional sizing and recovery ramp
    Intensity,
}

/// Everything the strategy engine needs, validated once at construction
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    pub mode: SizingMode,
    pub regime: RegimeConfig,
    pub trend: TrendConfig,
    pub risk: RiskConfig,
    pub intensity: IntensityConfig,
    pub recovery: RecoveryConfig,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.regime.validate()?;
        self.trend.validate()?;
        self.risk.validate()?;
        self.intensity.validate()?;
        self.recovery.validate()?;
        Ok(())
    }

    pub fn with_mode(mut self, mode: SizingMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    pub features: FeatureConfig,
    pub backtest: BacktestConfig,
}

impl AppConfig {
    /// Load from an optional TOML file plus `CRASHGUARD__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CRASHGUARD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let app: AppConfig = builder.build()?.try_deserialize()?;
        app.validate()?;

        tracing::debug!(mode = ?app.strategy.mode, "configuration loaded");
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        self.features.validate()?;
        self.backtest.validate()?;
        Ok(())
    }
}

/// Reject `value` unless it lies in `[min, max]` and is a real number
pub(crate) fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        });
    }
    Ok(())
}

/// Reject a pair whose lower bound is not strictly below the upper bound
pub(crate) fn check_ordered(
    lower_field: &'static str,
    lower: f64,
    upper_field: &'static str,
    upper: f64,
) -> Result<(), ConfigError> {
    if lower >= upper {
        return Err(ConfigError::Inverted {
            lower_field,
            lower,
            upper_field,
            upper,
        });
    }
    Ok(())
}
