use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backtest::BacktestConfig;
use crate::models::{DecisionReason, PositionDecision};
use crate::regime::MarketRegime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One fill in the trade ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub price: f64,
    pub units: f64,
    pub value: f64,
    pub transaction_cost: f64,
    pub reason: DecisionReason,
    pub target_fraction: f64,
}

/// A position from first buy to full exit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTrip {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub invested: f64, // Cash paid into the position, costs included
    pub proceeds: f64, // Cash received out of it, net of costs
    pub pnl: f64,
    pub pnl_pct: f64,
    pub holding_days: i64,
    pub open_at_end: bool, // Marked to market at the last bar
}

impl RoundTrip {
    pub fn new(
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        invested: f64,
        proceeds: f64,
        open_at_end: bool,
    ) -> Self {
        let pnl = proceeds - invested;
        Self {
            entry_time,
            exit_time,
            invested,
            proceeds,
            pnl,
            pnl_pct: if invested > 0.0 { pnl / invested * 100.0 } else { 0.0 },
            holding_days: (exit_time - entry_time).num_days(),
            open_at_end,
        }
    }
}

/// Days spent in each regime
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegimeCounts {
    pub normal: usize,
    pub crash: usize,
    pub recovery: usize,
}

impl RegimeCounts {
    pub fn from_decisions(decisions: &[PositionDecision]) -> Self {
        decisions.iter().fold(Self::default(), |mut counts, d| {
            match d.regime {
                MarketRegime::Normal => counts.normal += 1,
                MarketRegime::Crash => counts.crash += 1,
                MarketRegime::Recovery => counts.recovery += 1,
            }
            counts
        })
    }
}

/// Complete backtest performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub strategy: String,
    pub days: usize,

    // P&L
    pub initial_portfolio_value: f64,
    pub final_portfolio_value: f64,
    pub total_return_pct: f64,
    pub annual_return_pct: f64,

    // Risk
    pub annual_volatility_pct: f64,
    pub max_drawdown_pct: f64,
    pub recovery_days: Option<usize>, // From the max-drawdown trough back to the prior peak
    pub var_95_pct: f64,
    pub cvar_95_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub csi: f64, // Crash Survivability Index

    // Trades
    pub total_trades: usize,
    pub round_trips: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_transaction_costs: f64,

    // Engine behaviour
    pub stop_loss_exits: usize,
    pub breaker_trips: usize,
    pub degraded_steps: usize,
    pub regime_days: RegimeCounts,
}

impl BacktestMetrics {
    /// Calculate metrics from a finished run
    ///
    /// `equity` holds one end-of-day portfolio value per step.
    pub fn calculate(
        strategy: &str,
        config: &BacktestConfig,
        equity: &[f64],
        trades: &[TradeRecord],
        round_trips: &[RoundTrip],
        decisions: &[PositionDecision],
    ) -> Self {
        let initial = config.initial_capital;
        let final_value = equity.last().copied().unwrap_or(initial);
        let days = equity.len();
        let trading_days = config.trading_days as f64;

        let total_return = final_value / initial - 1.0;
        let annual_return = if days > 0 && total_return > -1.0 {
            (1.0 + total_return).powf(trading_days / days as f64) - 1.0
        } else {
            total_return
        };

        let returns = daily_returns(initial, equity);
        let daily_rf = config.daily_risk_free();
        let max_dd = max_drawdown(equity);

        let winning_trades = round_trips.iter().filter(|t| t.pnl > 0.0).count();
        let losing_trades = round_trips.len() - winning_trades;
        let win_rate = if round_trips.is_empty() {
            0.0
        } else {
            winning_trades as f64 / round_trips.len() as f64 * 100.0
        };

        let breaker_trips = decisions
            .iter()
            .enumerate()
            .filter(|(i, d)| {
                d.reason == DecisionReason::DrawdownBreaker
                    && (*i == 0 || decisions[i - 1].reason != DecisionReason::DrawdownBreaker)
            })
            .count();

        Self {
            strategy: strategy.to_string(),
            days,
            initial_portfolio_value: initial,
            final_portfolio_value: final_value,
            total_return_pct: total_return * 100.0,
            annual_return_pct: annual_return * 100.0,
            annual_volatility_pct: std_dev(&returns) * trading_days.sqrt() * 100.0,
            max_drawdown_pct: max_dd * 100.0,
            recovery_days: recovery_days(equity),
            var_95_pct: value_at_risk(&returns, 0.95) * 100.0,
            cvar_95_pct: conditional_value_at_risk(&returns, 0.95) * 100.0,
            sharpe_ratio: sharpe_ratio(&returns, daily_rf, trading_days),
            sortino_ratio: sortino_ratio(&returns, daily_rf, trading_days),
            calmar_ratio: ratio_to_drawdown(annual_return, max_dd),
            csi: crash_survivability_index(total_return, config.risk_free_rate, max_dd),
            total_trades: trades.len(),
            round_trips: round_trips.len(),
            winning_trades,
            losing_trades,
            win_rate,
            total_transaction_costs: trades.iter().map(|t| t.transaction_cost).sum(),
            stop_loss_exits: decisions
                .iter()
                .filter(|d| d.reason == DecisionReason::StopLoss)
                .count(),
            breaker_trips,
            degraded_steps: decisions.iter().filter(|d| d.degraded).count(),
            regime_days: RegimeCounts::from_decisions(decisions),
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");
        println!("  Strategy:              {}", self.strategy);
        println!("  Days:                  {}", self.days);

        println!("\n📊 P&L SUMMARY");
        println!(
            "  Initial Portfolio:     ${:.2}",
            self.initial_portfolio_value
        );
        println!("  Final Portfolio:       ${:.2}", self.final_portfolio_value);
        println!("  Total Return:          {:+.2}%", self.total_return_pct);
        println!("  Annual Return:         {:+.2}%", self.annual_return_pct);
        println!(
            "  Transaction Costs:     ${:.2}",
            self.total_transaction_costs
        );

        println!("\n⚠️  RISK METRICS");
        println!("  Max Drawdown:          {:.2}%", self.max_drawdown_pct);
        match self.recovery_days {
            Some(days) => println!("  Recovery:              {} days", days),
            None => println!("  Recovery:              not recovered"),
        }
        println!("  Annual Volatility:     {:.2}%", self.annual_volatility_pct);
        println!("  VaR / CVaR (95%):      {:.2}% / {:.2}%", self.var_95_pct, self.cvar_95_pct);
        println!("  Sharpe Ratio:          {:.2}", self.sharpe_ratio);
        println!("  Sortino Ratio:         {:.2}", self.sortino_ratio);
        println!("  Calmar Ratio:          {:.2}", self.calmar_ratio);
        println!("  CSI:                   {:.2}", self.csi);

        println!("\n📈 TRADE STATISTICS");
        println!("  Fills:                 {}", self.total_trades);
        println!("  Round Trips:           {}", self.round_trips);
        println!(
            "  Winning / Losing:      {} / {} ({:.1}% win rate)",
            self.winning_trades, self.losing_trades, self.win_rate
        );

        println!("\n🛑 SAFETY OVERRIDES");
        println!("  Stop-Loss Exits:       {}", self.stop_loss_exits);
        println!("  Drawdown Breaker:      {} trips", self.breaker_trips);
        println!("  Degraded Steps:        {}", self.degraded_steps);

        println!("\n🌡️  REGIMES");
        println!(
            "  Normal / Crash / Recovery: {} / {} / {} days",
            self.regime_days.normal, self.regime_days.crash, self.regime_days.recovery
        );

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}

/// Step-over-step returns, the first measured against the starting capital
pub fn daily_returns(initial: f64, equity: &[f64]) -> Vec<f64> {
    let mut previous = initial;
    equity
        .iter()
        .map(|&value| {
            let r = if previous > 0.0 { value / previous - 1.0 } else { 0.0 };
            previous = value;
            r
        })
        .collect()
}

/// Largest peak-to-trough decline as a positive fraction
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd: f64 = 0.0;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
        }
    }
    max_dd
}

/// Steps from the deepest trough until equity regains the preceding peak
pub fn recovery_days(equity: &[f64]) -> Option<usize> {
    if equity.is_empty() {
        return Some(0);
    }

    let mut peak = equity[0];
    let mut peak_at_trough = peak;
    let mut trough_idx = 0;
    let mut max_dd = 0.0;
    for (i, &value) in equity.iter().enumerate() {
        peak = peak.max(value);
        let dd = if peak > 0.0 { (peak - value) / peak } else { 0.0 };
        if dd > max_dd {
            max_dd = dd;
            trough_idx = i;
            peak_at_trough = peak;
        }
    }

    if max_dd == 0.0 {
        return Some(0);
    }

    equity[trough_idx..]
        .iter()
        .position(|&value| value >= peak_at_trough)
}

/// Annualized Sharpe ratio over daily returns
pub fn sharpe_ratio(returns: &[f64], daily_rf: f64, trading_days: f64) -> f64 {
    let sd = std_dev(returns);
    if returns.is_empty() || sd == 0.0 {
        return 0.0;
    }
    (mean(returns) - daily_rf) / sd * trading_days.sqrt()
}

/// Annualized Sortino ratio (downside deviation of losing days)
pub fn sortino_ratio(returns: &[f64], daily_rf: f64, trading_days: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let excess = mean(returns) - daily_rf;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_sd = std_dev(&downside);
    if downside_sd == 0.0 {
        return if excess > 0.0 { f64::INFINITY } else { 0.0 };
    }
    excess / downside_sd * trading_days.sqrt()
}

/// Crash Survivability Index: `(total_return - risk_free) / max_drawdown`
pub fn crash_survivability_index(total_return: f64, risk_free_rate: f64, max_dd: f64) -> f64 {
    if max_dd == 0.0 {
        return if total_return > 0.0 { f64::INFINITY } else { 0.0 };
    }
    (total_return - risk_free_rate) / max_dd
}

fn ratio_to_drawdown(annual_return: f64, max_dd: f64) -> f64 {
    if max_dd == 0.0 {
        return if annual_return > 0.0 { f64::INFINITY } else { 0.0 };
    }
    annual_return / max_dd
}

/// Historical VaR as a positive loss fraction
pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    quantile(returns, 1.0 - confidence).map(f64::abs).unwrap_or(0.0)
}

/// Mean loss beyond the VaR cutoff, as a positive fraction
pub fn conditional_value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    let Some(cutoff) = quantile(returns, 1.0 - confidence) else {
        return 0.0;
    };
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= cutoff).collect();
    if tail.is_empty() {
        cutoff.abs()
    } else {
        mean(&tail).abs()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    crate::indicators::calculate_std_dev(values).unwrap_or(0.0)
}

/// Linear-interpolated quantile
fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
}
