use serde::{Deserialize, Serialize};

use crate::config::{check_ordered, check_range};
use crate::error::ConfigError;
use crate::models::FeatureRecord;

/// Component weights for the Crash Intensity Score (must sum to 1.0)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IntensityWeights {
    pub duvol: f64,
    pub ncskew: f64,
    pub vol_spike: f64,
    pub canary: f64,
    pub momentum: f64,
}

impl Default for IntensityWeights {
    fn default() -> Self {
        Self {
            duvol: 0.25,
            ncskew: 0.20,
            vol_spike: 0.25,
            canary: 0.15,
            momentum: 0.15,
        }
    }
}

impl IntensityWeights {
    pub fn sum(&self) -> f64 {
        self.duvol + self.ncskew + self.vol_spike + self.canary + self.momentum
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IntensityConfig {
    pub weights: IntensityWeights,
    /// Below this score the position stays at full size
    pub lower_breakpoint: f64,
    /// Above this score the position is fully exited
    pub upper_breakpoint: f64,
    /// DUVOL mapped to 100 (0 maps to 0)
    pub duvol_high: f64,
    /// NCSKEW mapped to 100 (0 maps to 0)
    pub ncskew_high: f64,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            weights: IntensityWeights::default(),
            lower_breakpoint: 20.0,
            upper_breakpoint: 80.0,
            duvol_high: 1.0,
            ncskew_high: 2.0,
        }
    }
}

impl IntensityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (field, value) in [
            ("intensity.weights.duvol", w.duvol),
            ("intensity.weights.ncskew", w.ncskew),
            ("intensity.weights.vol_spike", w.vol_spike),
            ("intensity.weights.canary", w.canary),
            ("intensity.weights.momentum", w.momentum),
        ] {
            check_range(field, value, 0.0, 1.0, "[0, 1]")?;
        }

        let sum = w.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightsDoNotSumToOne { sum });
        }

        check_range(
            "intensity.lower_breakpoint",
            self.lower_breakpoint,
            0.0,
            100.0,
            "[0, 100]",
        )?;
        check_range(
            "intensity.upper_breakpoint",
            self.upper_breakpoint,
            0.0,
            100.0,
            "[0, 100]",
        )?;
        check_ordered(
            "intensity.lower_breakpoint",
            self.lower_breakpoint,
            "intensity.upper_breakpoint",
            self.upper_breakpoint,
        )?;
        check_range(
            "intensity.duvol_high",
            self.duvol_high,
            f64::MIN_POSITIVE,
            100.0,
            "(0, 100]",
        )?;
        check_range(
            "intensity.ncskew_high",
            self.ncskew_high,
            f64::MIN_POSITIVE,
            100.0,
            "(0, 100]",
        )?;
        Ok(())
    }
}

/// Normalized components and the weighted score, all on a 0-100 scale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CrashIntensity {
    pub duvol: f64,
    pub ncskew: f64,
    pub vol_spike: f64,
    pub canary: f64,
    pub momentum: f64,
    pub score: f64,
}

/// Continuous crash risk on a 0-100 scale
///
/// Unlike the discrete regime detector, the score grades crash severity so the
/// position can be cut proportionally instead of all-or-nothing.
///
/// ```text
/// CIS = w_duvol·DUVOL + w_ncskew·NCSKEW + w_vol·VolSpike + w_canary·Canary + w_mom·Momentum
/// ```
///
/// Stateless: identical records always produce identical scores.
#[derive(Debug, Clone)]
pub struct CrashIntensityScorer {
    config: IntensityConfig,
}

impl CrashIntensityScorer {
    pub fn new(config: IntensityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IntensityConfig {
        &self.config
    }

    /// DUVOL from [0, duvol_high] onto [0, 100]
    pub fn duvol_intensity(&self, duvol: f64) -> f64 {
        normalize(duvol, 0.0, self.config.duvol_high)
    }

    /// NCSKEW from [0, ncskew_high] onto [0, 100]
    pub fn ncskew_intensity(&self, ncskew: f64) -> f64 {
        normalize(ncskew, 0.0, self.config.ncskew_high)
    }

    /// Short volatility 3x the long volatility saturates at 100
    pub fn vol_spike_intensity(&self, record: &FeatureRecord) -> f64 {
        match record.vol_ratio() {
            Some(ratio) => clamp_pct((ratio - 1.0) * 50.0),
            None => 0.0,
        }
    }

    /// A 5% index drop saturates at 100; up days contribute nothing
    pub fn canary_intensity(&self, index_return: f64) -> f64 {
        if index_return.is_nan() || index_return >= 0.0 {
            return 0.0;
        }
        let drop_pct = -index_return * 100.0;
        clamp_pct(drop_pct * 20.0)
    }

    /// A -20% trailing return saturates at 100; gains contribute nothing
    pub fn momentum_intensity(&self, recent_return: f64) -> f64 {
        if recent_return.is_nan() || recent_return >= 0.0 {
            return 0.0;
        }
        clamp_pct(-recent_return * 500.0)
    }

    /// Score one record, keeping the component breakdown
    pub fn evaluate(&self, record: &FeatureRecord) -> CrashIntensity {
        let w = &self.config.weights;
        let duvol = self.duvol_intensity(record.duvol);
        let ncskew = self.ncskew_intensity(record.ncskew);
        let vol_spike = self.vol_spike_intensity(record);
        let canary = self.canary_intensity(record.index_return);
        let momentum = self.momentum_intensity(record.recent_return);

        let score = clamp_pct(
            w.duvol * duvol
                + w.ncskew * ncskew
                + w.vol_spike * vol_spike
                + w.canary * canary
                + w.momentum * momentum,
        );

        CrashIntensity {
            duvol,
            ncskew,
            vol_spike,
            canary,
            momentum,
            score,
        }
    }

    /// Crash Intensity Score in [0, 100]
    pub fn score(&self, record: &FeatureRecord) -> f64 {
        self.evaluate(record).score
    }

    pub fn score_series(&self, records: &[FeatureRecord]) -> Vec<f64> {
        records.iter().map(|r| self.score(r)).collect()
    }

    /// Piecewise-linear position fraction for a score
    ///
    /// Full size below the lower breakpoint, flat above the upper one, linear
    /// in between. Never increases as the score rises.
    pub fn proportional_fraction(&self, score: f64) -> f64 {
        let lower = self.config.lower_breakpoint;
        let upper = self.config.upper_breakpoint;

        if score.is_nan() || score > upper {
            0.0
        } else if score < lower {
            1.0
        } else {
            (1.0 - (score - lower) / (upper - lower)).clamp(0.0, 1.0)
        }
    }
}

impl Default for CrashIntensityScorer {
    fn default() -> Self {
        Self::new(IntensityConfig::default())
    }
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Affine map of `value` from [low, high] onto [0, 100], clamped
fn normalize(value: f64, low: f64, high: f64) -> f64 {
    if value.is_nan() || high <= low {
        return 0.0;
    }
    clamp_pct((value - low) / (high - low) * 100.0)
}
