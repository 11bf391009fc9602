//! Multi-asset mode
//!
//! Each sleeve gets `allocation × initial_capital` and its own engine,
//! breaker and drawdown tracking. Sleeves are independent, so they run in
//! parallel on blocking tasks. The portfolio equity curve is the sum of the
//! sleeve curves plus any unallocated cash.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::backtest::metrics::BacktestMetrics;
use crate::backtest::runner::{BacktestResult, BacktestRunner, EquityPoint};
use crate::backtest::BacktestConfig;
use crate::config::{check_range, StrategyConfig};
use crate::error::ConfigError;
use crate::features::{FeatureConfig, FeaturePipeline};
use crate::models::PriceBar;
use crate::strategy::{BuyAndHoldStrategy, StrategyEngine};
use crate::Result;

/// One asset and its share of starting capital
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSleeve {
    pub symbol: String,
    pub allocation: f64,
    pub bars: Vec<PriceBar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleeveResult {
    pub symbol: String,
    pub allocation: f64,
    pub strategy: BacktestResult,
    pub benchmark: BacktestResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub sleeves: Vec<SleeveResult>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
    pub benchmark: BacktestMetrics,
}

pub struct PortfolioRunner {
    strategy: StrategyConfig,
    features: FeatureConfig,
    backtest: BacktestConfig,
}

impl PortfolioRunner {
    pub fn new(strategy: StrategyConfig, features: FeatureConfig, backtest: BacktestConfig) -> Self {
        Self {
            strategy,
            features,
            backtest,
        }
    }

    /// Each allocation in [0, 1], together at most 1
    pub fn validate_allocations(sleeves: &[AssetSleeve]) -> std::result::Result<(), ConfigError> {
        for sleeve in sleeves {
            check_range("portfolio.allocation", sleeve.allocation, 0.0, 1.0, "[0, 1]")?;
        }
        let total: f64 = sleeves.iter().map(|s| s.allocation).sum();
        check_range("portfolio.total_allocation", total, 0.0, 1.0 + 1e-9, "[0, 1]")?;
        Ok(())
    }

    pub async fn run(&self, sleeves: Vec<AssetSleeve>) -> Result<PortfolioResult> {
        if sleeves.is_empty() {
            return Err("Portfolio needs at least one asset".into());
        }
        Self::validate_allocations(&sleeves)?;
        self.strategy.validate()?;

        tracing::info!("Running portfolio backtest across {} assets", sleeves.len());

        let mut tasks = JoinSet::new();
        for (slot, sleeve) in sleeves.into_iter().enumerate() {
            let strategy = self.strategy.clone();
            let features = self.features.clone();
            let backtest = BacktestConfig {
                initial_capital: self.backtest.initial_capital * sleeve.allocation,
                ..self.backtest.clone()
            };

            tasks.spawn_blocking(move || -> Result<(usize, SleeveResult)> {
                let pipeline = FeaturePipeline::new(features);
                let runner = BacktestRunner::new(backtest);

                let mut engine = StrategyEngine::new(strategy)?;
                let result = runner.run_bars(&mut engine, &pipeline, &sleeve.bars)?;
                let benchmark =
                    runner.run_bars(&mut BuyAndHoldStrategy::new(), &pipeline, &sleeve.bars)?;

                tracing::info!(
                    "{} sleeve done: {:+.2}% (buy & hold {:+.2}%)",
                    sleeve.symbol,
                    result.metrics.total_return_pct,
                    benchmark.metrics.total_return_pct
                );

                Ok((
                    slot,
                    SleeveResult {
                        symbol: sleeve.symbol,
                        allocation: sleeve.allocation,
                        strategy: result,
                        benchmark,
                    },
                ))
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            finished.push(joined??);
        }
        finished.sort_by_key(|(slot, _)| *slot);
        let sleeves: Vec<SleeveResult> = finished.into_iter().map(|(_, s)| s).collect();

        let idle_cash = self.backtest.initial_capital
            * (1.0 - sleeves.iter().map(|s| s.allocation).sum::<f64>()).max(0.0);

        let equity_curve = combine_curves(sleeves.iter().map(|s| &s.strategy), idle_cash);
        let benchmark_curve = combine_curves(sleeves.iter().map(|s| &s.benchmark), idle_cash);

        let metrics = self.combined_metrics("Portfolio", &sleeves, &equity_curve, |s| &s.strategy);
        let benchmark =
            self.combined_metrics("Portfolio-BuyAndHold", &sleeves, &benchmark_curve, |s| {
                &s.benchmark
            });

        Ok(PortfolioResult {
            sleeves,
            equity_curve,
            metrics,
            benchmark,
        })
    }

    fn combined_metrics<F>(
        &self,
        name: &str,
        sleeves: &[SleeveResult],
        curve: &[EquityPoint],
        pick: F,
    ) -> BacktestMetrics
    where
        F: Fn(&SleeveResult) -> &BacktestResult,
    {
        let equity: Vec<f64> = curve.iter().map(|p| p.equity).collect();
        let trades: Vec<_> = sleeves.iter().flat_map(|s| pick(s).trades.clone()).collect();
        let round_trips: Vec<_> = sleeves
            .iter()
            .flat_map(|s| pick(s).round_trips.clone())
            .collect();
        let decisions: Vec<_> = sleeves
            .iter()
            .flat_map(|s| pick(s).decisions.clone())
            .collect();

        BacktestMetrics::calculate(name, &self.backtest, &equity, &trades, &round_trips, &decisions)
    }
}

/// Sum sleeve equity on the dates every sleeve covers
fn combine_curves<'a, I>(results: I, idle_cash: f64) -> Vec<EquityPoint>
where
    I: Iterator<Item = &'a BacktestResult>,
{
    let mut totals: BTreeMap<DateTime<Utc>, (f64, f64, usize)> = BTreeMap::new();
    let mut count = 0;
    for result in results {
        count += 1;
        for point in &result.equity_curve {
            let entry = totals.entry(point.timestamp).or_insert((0.0, 0.0, 0));
            entry.0 += point.equity;
            entry.1 += point.equity * point.position_fraction;
            entry.2 += 1;
        }
    }

    totals
        .into_iter()
        .filter(|(_, (_, _, n))| *n == count)
        .map(|(timestamp, (equity, invested, _))| {
            let total = equity + idle_cash;
            EquityPoint {
                timestamp,
                equity: total,
                position_fraction: if total > 0.0 { invested / total } else { 0.0 },
            }
        })
        .collect()
}
