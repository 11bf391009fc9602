use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backtest::metrics::{BacktestMetrics, RoundTrip, TradeRecord, TradeSide};
use crate::backtest::BacktestConfig;
use crate::features::FeaturePipeline;
use crate::models::{FeatureRecord, PortfolioSignal, PositionDecision, PriceBar};
use crate::risk::TradingState;
use crate::strategy::Strategy;
use crate::Result;

/// End-of-day portfolio snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub position_fraction: f64,
}

/// Everything a single backtest produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub decisions: Vec<PositionDecision>,
    pub trades: Vec<TradeRecord>,
    pub round_trips: Vec<RoundTrip>,
}

/// Cash + single-asset holdings, marked at the close
#[derive(Debug)]
struct Book {
    cash: f64,
    units: f64,
    avg_entry_price: Option<f64>,
    opened_at: Option<DateTime<Utc>>,
    invested: f64,
    proceeds: f64,
}

impl Book {
    fn new(cash: f64) -> Self {
        Self {
            cash,
            units: 0.0,
            avg_entry_price: None,
            opened_at: None,
            invested: 0.0,
            proceeds: 0.0,
        }
    }

    fn equity(&self, price: f64) -> f64 {
        self.cash + self.units * price
    }

    fn fraction(&self, price: f64) -> f64 {
        let equity = self.equity(price);
        if equity > 0.0 {
            self.units * price / equity
        } else {
            0.0
        }
    }

    fn position_return(&self, price: f64) -> Option<f64> {
        match self.avg_entry_price {
            Some(entry) if self.units > 0.0 && entry > 0.0 => Some(price / entry - 1.0),
            _ => None,
        }
    }
}

/// Backtest runner that walks a feature sequence through a strategy
///
/// Each step: mark the book at the close, hand the strategy the resulting
/// `PortfolioSignal`, then rebalance to its target fraction at the same close
/// paying slippage and commission on the traded value.
pub struct BacktestRunner {
    config: BacktestConfig,
}

impl BacktestRunner {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Generate features from raw bars, then run
    pub fn run_bars<S: Strategy>(
        &self,
        strategy: &mut S,
        pipeline: &FeaturePipeline,
        bars: &[PriceBar],
    ) -> Result<BacktestResult> {
        let records = pipeline.generate(bars);
        if records.is_empty() {
            return Err(format!(
                "Not enough bars for backtest. Need more than {}, got {}",
                pipeline.config().warmup(),
                bars.len()
            )
            .into());
        }
        self.run(strategy, &records)
    }

    /// Run a backtest over pre-computed features
    pub fn run<S: Strategy>(
        &self,
        strategy: &mut S,
        records: &[FeatureRecord],
    ) -> Result<BacktestResult> {
        if records.is_empty() {
            return Err("No feature records to backtest".into());
        }

        tracing::info!(
            "Starting backtest: {} days, strategy {}",
            records.len(),
            strategy.name()
        );

        strategy.reset();
        let cost_rate = self.config.cost_rate();
        let mut book = Book::new(self.config.initial_capital);
        let mut state = TradingState::new(self.config.initial_capital);
        let mut last_price = records[0].price;

        let mut decisions = Vec::with_capacity(records.len());
        let mut equity_curve = Vec::with_capacity(records.len());
        let mut trades = Vec::new();
        let mut round_trips = Vec::new();

        for record in records {
            // Unusable closes are marked at the last good price
            let price = if record.price.is_finite() && record.price > 0.0 {
                record.price
            } else {
                tracing::warn!(timestamp = %record.timestamp, "Invalid close, marking at last price");
                last_price
            };
            last_price = price;

            state.update_portfolio_value(book.equity(price));
            let signal = PortfolioSignal {
                position_return: book.position_return(price),
                drawdown: state.drawdown(),
            };

            let decision = strategy.decide(record, signal)?;
            let target = decision.target_fraction.clamp(0.0, 1.0);

            if let Some(trade) = self.rebalance(&mut book, &decision, target, price, cost_rate) {
                tracing::debug!(
                    "{:?} {:.4} units @ ${:.4} ({:?}, target {:.2})",
                    trade.side,
                    trade.units,
                    trade.price,
                    trade.reason,
                    target
                );
                trades.push(trade);
            }

            if book.units == 0.0 {
                if let Some(opened_at) = book.opened_at.take() {
                    round_trips.push(RoundTrip::new(
                        opened_at,
                        record.timestamp,
                        book.invested,
                        book.proceeds,
                        false,
                    ));
                    book.invested = 0.0;
                    book.proceeds = 0.0;
                }
            }

            equity_curve.push(EquityPoint {
                timestamp: record.timestamp,
                equity: book.equity(price),
                position_fraction: book.fraction(price),
            });
            decisions.push(decision);
        }

        if let (Some(opened_at), Some(last)) = (book.opened_at, records.last()) {
            round_trips.push(RoundTrip::new(
                opened_at,
                last.timestamp,
                book.invested,
                book.proceeds + book.units * last_price,
                true,
            ));
        }

        let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
        let metrics = BacktestMetrics::calculate(
            strategy.name(),
            &self.config,
            &equity,
            &trades,
            &round_trips,
            &decisions,
        );

        tracing::info!(
            "Backtest complete: {} fills, return {:+.2}%, max drawdown {:.2}%",
            metrics.total_trades,
            metrics.total_return_pct,
            metrics.max_drawdown_pct
        );

        Ok(BacktestResult {
            metrics,
            equity_curve,
            decisions,
            trades,
            round_trips,
        })
    }

    /// Run backtest and print report
    pub fn run_and_report<S: Strategy>(
        &self,
        strategy: &mut S,
        records: &[FeatureRecord],
        scenario_name: &str,
    ) -> Result<BacktestResult> {
        println!("\n🔬 Running backtest: {}", scenario_name);
        println!("   Strategy: {}", strategy.name());
        println!("   Days: {}", records.len());
        println!("   Initial Portfolio: ${:.2}", self.config.initial_capital);

        let result = self.run(strategy, records)?;
        result.metrics.print_report();

        Ok(result)
    }

    /// Move the book to `target`, returning the fill if one happened
    fn rebalance(
        &self,
        book: &mut Book,
        decision: &PositionDecision,
        target: f64,
        price: f64,
        cost_rate: f64,
    ) -> Option<TradeRecord> {
        let equity = book.equity(price);
        let current = book.fraction(price);
        let full_exit = target == 0.0 && book.units > 0.0;

        if !full_exit && (target - current).abs() <= self.config.rebalance_threshold {
            return None;
        }
        if equity <= 0.0 {
            return None;
        }

        let delta_value = target * equity - book.units * price;
        if delta_value > 0.0 {
            let cost = delta_value * cost_rate;
            let units = (delta_value - cost) / price;

            let held_value = book.units * book.avg_entry_price.unwrap_or(price);
            book.avg_entry_price = Some((held_value + units * price) / (book.units + units));
            book.units += units;
            book.cash -= delta_value;
            book.invested += delta_value;
            book.opened_at.get_or_insert(decision.timestamp);

            Some(self.fill(decision, TradeSide::Buy, price, units, delta_value, cost, target))
        } else {
            let units = if full_exit {
                book.units
            } else {
                (-delta_value / price).min(book.units)
            };
            let value = units * price;
            let cost = value * cost_rate;

            book.units -= units;
            book.cash += value - cost;
            book.proceeds += value - cost;
            if full_exit {
                book.units = 0.0;
                book.avg_entry_price = None;
            }

            Some(self.fill(decision, TradeSide::Sell, price, units, value, cost, target))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill(
        &self,
        decision: &PositionDecision,
        side: TradeSide,
        price: f64,
        units: f64,
        value: f64,
        cost: f64,
        target: f64,
    ) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            timestamp: decision.timestamp,
            side,
            price,
            units,
            value,
            transaction_cost: cost,
            reason: decision.reason,
            target_fraction: target,
        }
    }
}

impl Default for BacktestRunner {
    fn default() -> Self {
        Self::new(BacktestConfig::default())
    }
}
