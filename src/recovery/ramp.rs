use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::{check_ordered, check_range};
use crate::error::ConfigError;
use crate::models::FeatureRecord;

/// Position fraction for each ramp step
pub const RAMP_FRACTIONS: [f64; 5] = [0.0, 0.25, 0.50, 0.75, 1.0];

const FINAL_STEP: u8 = 4;

// Recovery score component weights
const PRICE_WEIGHT: f64 = 0.30;
const VOLATILITY_WEIGHT: f64 = 0.25;
const INTENSITY_WEIGHT: f64 = 0.25;
const RSI_WEIGHT: f64 = 0.20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Steps spent flat before the first ramp step is allowed
    pub min_dwell_days: u32,
    pub score_threshold: f64,
    /// How far back "declining" and "normalizing" compare
    pub lookback_steps: usize,
    /// Short/long volatility ratio already counted as settled
    pub calm_vol_ratio: f64,
    /// Crash intensity already counted as settled
    pub calm_intensity: f64,
    /// RSI band counted as neutral
    pub calm_rsi_low: f64,
    pub calm_rsi_high: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_dwell_days: 3,
            score_threshold: 0.60,
            lookback_steps: 3,
            calm_vol_ratio: 1.0,
            calm_intensity: 20.0,
            calm_rsi_low: 30.0,
            calm_rsi_high: 70.0,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "recovery.score_threshold",
            self.score_threshold,
            0.0,
            1.0,
            "[0, 1]",
        )?;
        check_range(
            "recovery.lookback_steps",
            self.lookback_steps as f64,
            1.0,
            250.0,
            "[1, 250]",
        )?;
        check_range(
            "recovery.min_dwell_days",
            self.min_dwell_days as f64,
            0.0,
            365.0,
            "[0, 365]",
        )?;
        check_range(
            "recovery.calm_vol_ratio",
            self.calm_vol_ratio,
            0.0,
            10.0,
            "[0, 10]",
        )?;
        check_range(
            "recovery.calm_intensity",
            self.calm_intensity,
            0.0,
            100.0,
            "[0, 100]",
        )?;
        check_range("recovery.calm_rsi_low", self.calm_rsi_low, 0.0, 100.0, "[0, 100]")?;
        check_range("recovery.calm_rsi_high", self.calm_rsi_high, 0.0, 100.0, "[0, 100]")?;
        check_ordered(
            "recovery.calm_rsi_low",
            self.calm_rsi_low,
            "recovery.calm_rsi_high",
            self.calm_rsi_high,
        )?;
        Ok(())
    }
}

/// Bookkeeping for one cash episode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RecoveryRampState {
    pub active: bool,
    pub step_index: u8,
    pub days_in_cash: u32,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    vol_ratio: Option<f64>,
    intensity: f64,
    rsi: f64,
}

/// Staged 0% → 25% → 50% → 75% → 100% re-entry after a full liquidation
///
/// The engine opens an episode with [`enter_cash`](Self::enter_cash) and calls
/// [`advance`](Self::advance) on every later step. The first step up needs both
/// a recovery score above the threshold and the minimum dwell in cash; each
/// following step only needs the score. Reaching 100% closes the episode.
///
/// The recovery score is fed by [`observe`](Self::observe), which should see
/// every complete record so the lookback comparisons stay aligned in time.
#[derive(Debug, Clone)]
pub struct AdaptiveRecoveryEngine {
    config: RecoveryConfig,
    state: RecoveryRampState,
    history: VecDeque<Observation>,
}

impl AdaptiveRecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        let capacity = config.lookback_steps + 1;
        Self {
            config,
            state: RecoveryRampState::default(),
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn state(&self) -> RecoveryRampState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Fraction implied by the current ramp step
    pub fn fraction(&self) -> f64 {
        RAMP_FRACTIONS[self.state.step_index.min(FINAL_STEP) as usize]
    }

    /// Score the record against the lookback window, then record it
    pub fn observe(&mut self, record: &FeatureRecord, intensity: f64) -> f64 {
        let score = self.score(record, intensity);

        self.history.push_back(Observation {
            vol_ratio: record.vol_ratio(),
            intensity,
            rsi: record.rsi,
        });
        while self.history.len() > self.config.lookback_steps {
            self.history.pop_front();
        }

        score
    }

    /// Recovery score in [0, 1] without touching the history
    ///
    /// Volatility, intensity and RSI each count when they are either still
    /// improving against the lookback or already at a calm level.
    pub fn score(&self, record: &FeatureRecord, intensity: f64) -> f64 {
        let cfg = &self.config;
        let mut score = 0.0;

        if record.price > record.ma_short {
            score += PRICE_WEIGHT;
        }

        // Oldest entry is exactly `lookback_steps` back once the window is full
        let past = if self.history.len() == cfg.lookback_steps {
            self.history.front()
        } else {
            None
        };

        let ratio = record.vol_ratio();
        let vol_calm = ratio.map(|r| r < cfg.calm_vol_ratio).unwrap_or(false);
        let vol_falling = match (ratio, past.and_then(|p| p.vol_ratio)) {
            (Some(now), Some(then)) => now < then,
            _ => false,
        };
        if vol_calm || vol_falling {
            score += VOLATILITY_WEIGHT;
        }

        let intensity_calm = intensity < cfg.calm_intensity;
        let intensity_falling = past.map(|p| intensity < p.intensity).unwrap_or(false);
        if intensity_calm || intensity_falling {
            score += INTENSITY_WEIGHT;
        }

        // NaN RSI fails both checks
        let rsi_calm = record.rsi > cfg.calm_rsi_low && record.rsi < cfg.calm_rsi_high;
        let rsi_normalizing = past
            .map(|p| (record.rsi - 50.0).abs() < (p.rsi - 50.0).abs())
            .unwrap_or(false);
        if rsi_calm || rsi_normalizing {
            score += RSI_WEIGHT;
        }

        score
    }

    /// Open (or restart) a cash episode at 0%
    pub fn enter_cash(&mut self) {
        if self.state.active && self.state.step_index > 0 {
            tracing::debug!(
                "Recovery ramp interrupted at step {}, restarting",
                self.state.step_index
            );
        }
        self.state = RecoveryRampState {
            active: true,
            step_index: 0,
            days_in_cash: 0,
        };
    }

    /// Move the episode forward one step and return the ramp fraction
    pub fn advance(&mut self, recovery_score: f64) -> f64 {
        if !self.state.active {
            return self.fraction();
        }

        if self.state.step_index == 0 {
            self.state.days_in_cash += 1;
        }

        if recovery_score > self.config.score_threshold
            && self.state.days_in_cash >= self.config.min_dwell_days
        {
            self.state.step_index = (self.state.step_index + 1).min(FINAL_STEP);
            tracing::debug!(
                score = recovery_score,
                days_in_cash = self.state.days_in_cash,
                "Recovery ramp advanced to {:.0}%",
                self.fraction() * 100.0
            );
        }

        let fraction = self.fraction();
        if self.state.step_index >= FINAL_STEP {
            self.state.active = false;
            self.state.step_index = 0;
            tracing::debug!("Recovery ramp complete, trend signal resumes");
        }
        fraction
    }

    pub fn reset(&mut self) {
        self.state = RecoveryRampState::default();
        self.history.clear();
    }
}

impl Default for AdaptiveRecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}
