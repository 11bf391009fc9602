// Feature pipeline
// Turns aligned daily closes of the asset and canary index into FeatureRecords

use serde::{Deserialize, Serialize};

use crate::config::{check_ordered, check_range};
use crate::error::ConfigError;
use crate::indicators::{
    calculate_duvol, calculate_ncskew, calculate_rsi, calculate_sma, calculate_std_dev,
    ma_crossover_sign,
};
use crate::models::{FeatureRecord, PriceBar};

/// Rolling window sizes for feature generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    pub window: usize,            // DUVOL / NCSKEW window
    pub vol_short_window: usize,  // Short volatility (10d)
    pub vol_long_window: usize,   // Long volatility (30d)
    pub rsi_period: usize,
    pub ma_fast_period: usize,
    pub ma_slow_period: usize,
    pub momentum_window: usize,   // Trailing return horizon
    pub canary_threshold: f64,    // Index daily return that raises the canary flag
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window: 20,
            vol_short_window: 10,
            vol_long_window: 30,
            rsi_period: 14,
            ma_fast_period: 10,
            ma_slow_period: 30,
            momentum_window: 5,
            canary_threshold: -0.03,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("features.window", self.window as f64, 3.0, 1000.0, "[3, 1000]")?;
        check_range(
            "features.vol_short_window",
            self.vol_short_window as f64,
            2.0,
            1000.0,
            "[2, 1000]",
        )?;
        check_ordered(
            "features.vol_short_window",
            self.vol_short_window as f64,
            "features.vol_long_window",
            self.vol_long_window as f64,
        )?;
        check_range("features.rsi_period", self.rsi_period as f64, 1.0, 1000.0, "[1, 1000]")?;
        check_range(
            "features.ma_fast_period",
            self.ma_fast_period as f64,
            1.0,
            1000.0,
            "[1, 1000]",
        )?;
        check_ordered(
            "features.ma_fast_period",
            self.ma_fast_period as f64,
            "features.ma_slow_period",
            self.ma_slow_period as f64,
        )?;
        check_range(
            "features.momentum_window",
            self.momentum_window as f64,
            1.0,
            1000.0,
            "[1, 1000]",
        )?;
        check_range(
            "features.canary_threshold",
            self.canary_threshold,
            -1.0,
            0.0,
            "[-1, 0]",
        )?;
        Ok(())
    }

    /// Index of the first bar with every rolling window filled
    pub fn warmup(&self) -> usize {
        [
            self.window,
            self.vol_long_window,
            self.ma_slow_period.saturating_sub(1),
            self.rsi_period,
            self.momentum_window,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Generates one FeatureRecord per bar once the warmup is covered
#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    config: FeatureConfig,
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Build the feature stream for `bars`
    ///
    /// Bars before the warmup index produce no record. Non-positive closes
    /// yield NaN returns, which the engine treats as a degraded step.
    pub fn generate(&self, bars: &[PriceBar]) -> Vec<FeatureRecord> {
        let cfg = &self.config;
        let start = cfg.warmup();
        if bars.len() <= start {
            tracing::debug!(
                "Not enough bars for features: need more than {}, got {}",
                start,
                bars.len()
            );
            return Vec::new();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        // returns[j] is the return into bar j + 1
        let returns: Vec<f64> = closes
            .windows(2)
            .map(|w| simple_return(w[0], w[1]))
            .collect();

        let records: Vec<FeatureRecord> = (start..bars.len())
            .map(|i| {
                let prices = &closes[..=i];
                let index_return = simple_return(bars[i - 1].index_close, bars[i].index_close);

                FeatureRecord {
                    timestamp: bars[i].timestamp,
                    price: closes[i],
                    ma_short: calculate_sma(prices, cfg.ma_fast_period).unwrap_or(f64::NAN),
                    duvol: calculate_duvol(trailing(&returns, i, cfg.window)),
                    ncskew: calculate_ncskew(trailing(&returns, i, cfg.window)),
                    vol_short: calculate_std_dev(trailing(&returns, i, cfg.vol_short_window))
                        .unwrap_or(f64::NAN),
                    vol_long: calculate_std_dev(trailing(&returns, i, cfg.vol_long_window))
                        .unwrap_or(f64::NAN),
                    rsi: calculate_rsi(prices, cfg.rsi_period).unwrap_or(50.0),
                    ma_crossover: ma_crossover_sign(
                        prices,
                        cfg.ma_fast_period,
                        cfg.ma_slow_period,
                    )
                    .unwrap_or(0),
                    canary: index_return < cfg.canary_threshold,
                    recent_return: simple_return(closes[i - cfg.momentum_window], closes[i]),
                    index_return,
                }
            })
            .collect();

        tracing::debug!(
            "Generated {} feature records from {} bars (warmup {})",
            records.len(),
            bars.len(),
            start
        );

        records
    }
}

/// The `len` returns leading into bar `end`
fn trailing(returns: &[f64], end: usize, len: usize) -> &[f64] {
    &returns[end - len..end]
}

fn simple_return(previous: f64, current: f64) -> f64 {
    if previous > 0.0 {
        current / previous - 1.0
    } else {
        f64::NAN
    }
}
