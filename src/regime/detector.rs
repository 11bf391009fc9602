//! Market Regime Detector: a three-state machine over FeatureRecords
//!
//! - Normal → Crash: DUVOL above threshold, OR trailing return below the
//!   canary drop threshold, OR the canary flag is raised
//! - Crash → Recovery: always, on the very next step
//! - Recovery → Crash: any crash condition again
//! - Recovery → Normal: short/long volatility ratio below threshold
//!
//! State persists across steps. Missing values never satisfy a condition.

use serde::{Deserialize, Serialize};

use crate::config::check_range;
use crate::error::ConfigError;
use crate::models::FeatureRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    #[default]
    Normal,   // Trend-following applies
    Crash,    // One-step liquidation signal
    Recovery, // Waiting for volatility to settle
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Normal => "normal",
            MarketRegime::Crash => "crash",
            MarketRegime::Recovery => "recovery",
        }
    }
}

/// Thresholds for regime transitions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RegimeConfig {
    pub duvol_threshold: f64,
    pub canary_drop_threshold: f64,
    pub volatility_ratio_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            duvol_threshold: 0.5,
            canary_drop_threshold: -0.03, // -3% trailing return
            volatility_ratio_threshold: 1.0,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "regime.duvol_threshold",
            self.duvol_threshold,
            -10.0,
            10.0,
            "[-10, 10]",
        )?;
        check_range(
            "regime.canary_drop_threshold",
            self.canary_drop_threshold,
            -1.0,
            0.0,
            "[-1, 0]",
        )?;
        check_range(
            "regime.volatility_ratio_threshold",
            self.volatility_ratio_threshold,
            f64::MIN_POSITIVE,
            10.0,
            "(0, 10]",
        )?;
        Ok(())
    }
}

/// Result of feeding one record to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegimeUpdate {
    pub regime: MarketRegime,
    pub previous: MarketRegime,
    pub changed: bool,
}

impl RegimeUpdate {
    /// True on the step a crash is entered (from Normal or Recovery)
    pub fn entered_crash(&self) -> bool {
        self.changed && self.regime == MarketRegime::Crash
    }
}

/// Regime transition function
pub fn transition(
    current: MarketRegime,
    crash_signal: bool,
    recovery_complete: bool,
) -> MarketRegime {
    match current {
        MarketRegime::Normal if crash_signal => MarketRegime::Crash,
        MarketRegime::Normal => MarketRegime::Normal,
        MarketRegime::Crash => MarketRegime::Recovery,
        MarketRegime::Recovery if crash_signal => MarketRegime::Crash,
        MarketRegime::Recovery if recovery_complete => MarketRegime::Normal,
        MarketRegime::Recovery => MarketRegime::Recovery,
    }
}

#[derive(Debug, Clone)]
pub struct RegimeDetector {
    config: RegimeConfig,
    current: MarketRegime,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            current: MarketRegime::Normal,
        }
    }

    pub fn current(&self) -> MarketRegime {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = MarketRegime::Normal;
    }

    /// Any one crash condition suffices
    pub fn is_crash_signal(&self, record: &FeatureRecord) -> bool {
        // NaN compares false, so missing values fail closed toward Normal
        record.duvol > self.config.duvol_threshold
            || record.recent_return < self.config.canary_drop_threshold
            || record.canary
    }

    /// Volatility has mean-reverted; undefined ratios never qualify
    pub fn is_recovery_complete(&self, record: &FeatureRecord) -> bool {
        record
            .vol_ratio()
            .map(|ratio| ratio < self.config.volatility_ratio_threshold)
            .unwrap_or(false)
    }

    /// Advance the state machine by one record
    pub fn update(&mut self, record: &FeatureRecord) -> RegimeUpdate {
        if record.duvol.is_nan() || record.recent_return.is_nan() {
            tracing::warn!(
                timestamp = %record.timestamp,
                "Missing crash inputs, treating as no crash signal"
            );
        }

        let previous = self.current;
        let next = transition(
            previous,
            self.is_crash_signal(record),
            self.is_recovery_complete(record),
        );
        self.current = next;

        if next != previous {
            tracing::debug!(
                timestamp = %record.timestamp,
                "Regime {} -> {}",
                previous.as_str(),
                next.as_str()
            );
        }

        RegimeUpdate {
            regime: next,
            previous,
            changed: next != previous,
        }
    }

    /// Classify a whole sequence starting from Normal
    pub fn detect_regimes(&mut self, records: &[FeatureRecord]) -> Vec<MarketRegime> {
        self.reset();
        records.iter().map(|r| self.update(r).regime).collect()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}
