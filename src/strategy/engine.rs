use chrono::{DateTime, Utc};

use crate::config::{SizingMode, StrategyConfig};
use crate::error::{ConfigError, EngineError};
use crate::intensity::CrashIntensityScorer;
use crate::models::{DecisionReason, FeatureRecord, PortfolioSignal, PositionDecision, TrendSignal};
use crate::recovery::AdaptiveRecoveryEngine;
use crate::regime::{MarketRegime, RegimeDetector, RegimeUpdate};
use crate::risk::{CircuitBreakerTrip, CircuitBreakers};
use crate::strategy::signals::{trend_signal, volatility_target_size};

/// Per-step decision engine
///
/// Composes the regime detector, crash intensity scorer and recovery ramp
/// with the stop-loss and drawdown overrides. Feed it one record per step in
/// strictly increasing timestamp order.
///
/// Step order:
/// 1. Trend signal from RSI + MA crossover (held when neither side fires)
/// 2. Sizing by mode ([`SizingMode::Regime`] or [`SizingMode::Intensity`])
/// 3. Stop-loss override
/// 4. Drawdown breaker override (latched until cleared)
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    config: StrategyConfig,
    detector: RegimeDetector,
    scorer: CrashIntensityScorer,
    recovery: AdaptiveRecoveryEngine,
    breakers: CircuitBreakers,
    trend: TrendSignal,
    last_timestamp: Option<DateTime<Utc>>,
    last_fraction: f64,
    last_reason: DecisionReason,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            detector: RegimeDetector::new(config.regime.clone()),
            scorer: CrashIntensityScorer::new(config.intensity.clone()),
            recovery: AdaptiveRecoveryEngine::new(config.recovery.clone()),
            breakers: CircuitBreakers::new(config.risk.clone()),
            config,
            trend: TrendSignal::Cash,
            last_timestamp: None,
            last_fraction: 0.0,
            last_reason: DecisionReason::TrendSignal,
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn regime(&self) -> MarketRegime {
        self.detector.current()
    }

    pub fn recovery(&self) -> &AdaptiveRecoveryEngine {
        &self.recovery
    }

    pub fn is_drawdown_breaker_tripped(&self) -> bool {
        self.breakers.is_drawdown_tripped()
    }

    /// Release a latched drawdown breaker
    pub fn clear_drawdown_breaker(&mut self) {
        self.breakers.clear();
    }

    /// Back to the initial state, keeping the configuration
    pub fn reset(&mut self) {
        self.detector.reset();
        self.recovery.reset();
        self.breakers.clear();
        self.trend = TrendSignal::Cash;
        self.last_timestamp = None;
        self.last_fraction = 0.0;
        self.last_reason = DecisionReason::TrendSignal;
    }

    /// Produce the decision for one record
    pub fn step(
        &mut self,
        record: &FeatureRecord,
        portfolio: PortfolioSignal,
    ) -> Result<PositionDecision, EngineError> {
        if let Some(previous) = self.last_timestamp {
            if record.timestamp <= previous {
                return Err(EngineError::OutOfOrder {
                    previous,
                    received: record.timestamp,
                });
            }
        }
        self.last_timestamp = Some(record.timestamp);

        let update = self.detector.update(record);
        let intensity = self.scorer.score(record);
        let degraded = !record.is_complete();

        let (fraction, reason) = if degraded && update.entered_crash() {
            // The crash conditions never read NaN as true, so this crash is real
            tracing::warn!(
                timestamp = %record.timestamp,
                "Incomplete features on a fresh crash, liquidating"
            );
            self.liquidate_on_crash();
            (0.0, DecisionReason::CrashLiquidation)
        } else if degraded {
            tracing::warn!(
                timestamp = %record.timestamp,
                "Incomplete features, holding previous fraction {:.2}",
                self.last_fraction
            );
            (self.last_fraction, self.last_reason)
        } else {
            let recovery_score = self.recovery.observe(record, intensity);
            if let Some(signal) = trend_signal(record, &self.config.trend) {
                self.trend = signal;
            }

            match self.config.mode {
                SizingMode::Regime => self.size_by_regime(record, update),
                SizingMode::Intensity => self.size_by_intensity(update, intensity, recovery_score),
            }
        };

        let (fraction, reason) = match self.breakers.check(&portfolio) {
            Ok(()) => (fraction, reason),
            Err(CircuitBreakerTrip::MaxDrawdown) => (0.0, DecisionReason::DrawdownBreaker),
            Err(CircuitBreakerTrip::StopLoss) => {
                tracing::info!(
                    timestamp = %record.timestamp,
                    "Stop-loss hit at {:.2}%",
                    portfolio.position_return.unwrap_or(0.0) * 100.0
                );
                // Re-entry needs a fresh trend signal
                self.trend = TrendSignal::Cash;
                if self.recovery.is_active() {
                    self.recovery.enter_cash();
                }
                (0.0, DecisionReason::StopLoss)
            }
        };

        self.last_fraction = fraction;
        self.last_reason = reason;

        Ok(PositionDecision {
            timestamp: record.timestamp,
            target_fraction: fraction,
            reason,
            regime: update.regime,
            crash_intensity: intensity,
            degraded,
        })
    }

    /// Step a whole sequence, asking `portfolio` for the signal before each step
    ///
    /// The closure receives the step index and the previous decision (if any).
    pub fn run<F>(
        &mut self,
        records: &[FeatureRecord],
        mut portfolio: F,
    ) -> Result<Vec<PositionDecision>, EngineError>
    where
        F: FnMut(usize, Option<&PositionDecision>) -> PortfolioSignal,
    {
        let mut decisions: Vec<PositionDecision> = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let signal = portfolio(i, decisions.last());
            decisions.push(self.step(record, signal)?);
        }
        Ok(decisions)
    }

    /// Flat on a crash seen without a complete record
    fn liquidate_on_crash(&mut self) {
        match self.config.mode {
            SizingMode::Regime => self.trend = TrendSignal::Cash,
            SizingMode::Intensity => {
                if self.recovery.is_active() || self.last_fraction > 0.0 {
                    self.recovery.enter_cash();
                }
            }
        }
    }

    fn size_by_regime(
        &mut self,
        record: &FeatureRecord,
        update: RegimeUpdate,
    ) -> (f64, DecisionReason) {
        match update.regime {
            MarketRegime::Crash | MarketRegime::Recovery => {
                if update.entered_crash() {
                    tracing::info!(timestamp = %record.timestamp, "Crash detected, liquidating");
                }
                self.trend = TrendSignal::Cash;
                (0.0, DecisionReason::CrashLiquidation)
            }
            MarketRegime::Normal => match self.trend {
                TrendSignal::Long => {
                    let risk = &self.config.risk;
                    let size = volatility_target_size(
                        record.vol_short,
                        risk.volatility_target,
                        risk.max_position_size,
                    );
                    (size, DecisionReason::TrendSignal)
                }
                TrendSignal::Cash => (0.0, DecisionReason::TrendSignal),
            },
        }
    }

    fn size_by_intensity(
        &mut self,
        update: RegimeUpdate,
        intensity: f64,
        recovery_score: f64,
    ) -> (f64, DecisionReason) {
        let max_size = self.config.risk.max_position_size;
        let proportional = self.scorer.proportional_fraction(intensity) * max_size;

        if self.recovery.is_active() {
            if update.entered_crash() {
                self.recovery.enter_cash();
                return (0.0, DecisionReason::CrashLiquidation);
            }
            let ramp = self.recovery.advance(recovery_score) * max_size;
            return (ramp.min(proportional), DecisionReason::RecoveryRamp);
        }

        if self.trend == TrendSignal::Cash {
            return (0.0, DecisionReason::TrendSignal);
        }

        if proportional <= 0.0 {
            if self.last_fraction > 0.0 {
                tracing::info!(
                    intensity = intensity,
                    "Crash intensity forced full exit, starting recovery ramp"
                );
                self.recovery.enter_cash();
            }
            (0.0, DecisionReason::CrashLiquidation)
        } else if proportional < max_size {
            (proportional, DecisionReason::ProportionalReduction)
        } else {
            (proportional, DecisionReason::TrendSignal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(day: i64) -> FeatureRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FeatureRecord::neutral(start + Duration::days(day))
    }

    fn long_entry(day: i64) -> FeatureRecord {
        FeatureRecord {
            rsi: 25.0,
            ma_crossover: 1,
            ..record(day)
        }
    }

    fn engine(mode: SizingMode) -> StrategyEngine {
        StrategyEngine::new(StrategyConfig::default().with_mode(mode)).unwrap()
    }

    fn flat() -> PortfolioSignal {
        PortfolioSignal::default()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StrategyConfig::default();
        config.intensity.weights.duvol = 0.9;
        assert!(StrategyEngine::new(config).is_err());
    }

    #[test]
    fn test_starts_in_cash() {
        let mut engine = engine(SizingMode::Regime);
        let decision = engine.step(&record(0), flat()).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::TrendSignal);
    }

    #[test]
    fn test_regime_mode_volatility_sizing() {
        let mut engine = engine(SizingMode::Regime);
        let mut entry = long_entry(0);
        entry.vol_short = 0.04;

        let decision = engine.step(&entry, flat()).unwrap();
        assert!((decision.target_fraction - 0.5).abs() < 1e-12);

        // Neutral record holds LONG
        let decision = engine.step(&record(1), flat()).unwrap();
        assert_eq!(decision.target_fraction, 1.0);
    }

    #[test]
    fn test_regime_mode_crash_liquidates_and_waits() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let mut crash = long_entry(1);
        crash.duvol = 0.6;
        let decision = engine.step(&crash, flat()).unwrap();
        assert_eq!(decision.regime, MarketRegime::Crash);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::CrashLiquidation);

        // Recovery with elevated volatility: still flat
        let mut elevated = record(2);
        elevated.vol_short = 0.03;
        let decision = engine.step(&elevated, flat()).unwrap();
        assert_eq!(decision.regime, MarketRegime::Recovery);
        assert_eq!(decision.target_fraction, 0.0);

        // Back to Normal but the trend must re-enter
        let mut calm = record(3);
        calm.vol_short = 0.01;
        let decision = engine.step(&calm, flat()).unwrap();
        assert_eq!(decision.regime, MarketRegime::Normal);
        assert_eq!(decision.target_fraction, 0.0);

        let decision = engine.step(&long_entry(4), flat()).unwrap();
        assert_eq!(decision.target_fraction, 1.0);
    }

    #[test]
    fn test_exit_signal_goes_to_cash() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let exit = FeatureRecord {
            rsi: 75.0,
            ma_crossover: -1,
            ..record(1)
        };
        let decision = engine.step(&exit, flat()).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::TrendSignal);
    }

    #[test]
    fn test_intensity_mode_proportional_reduction() {
        let mut engine = engine(SizingMode::Intensity);
        engine.step(&long_entry(0), flat()).unwrap();

        let mut risky = record(1);
        risky.duvol = 0.4; // below the regime threshold, CIS 10 → still full
        risky.ncskew = 2.0; // +20 → CIS 30
        let decision = engine.step(&risky, flat()).unwrap();
        assert!((decision.crash_intensity - 30.0).abs() < 1e-9);
        assert!((decision.target_fraction - (1.0 - 10.0 / 60.0)).abs() < 1e-9);
        assert_eq!(decision.reason, DecisionReason::ProportionalReduction);
    }

    #[test]
    fn test_intensity_mode_exit_opens_ramp() {
        let mut engine = engine(SizingMode::Intensity);
        engine.step(&long_entry(0), flat()).unwrap();

        let extreme = FeatureRecord {
            duvol: 1.0,
            ncskew: 4.0,
            vol_short: 0.08,
            index_return: -0.05,
            recent_return: -0.2,
            ..record(1)
        };
        let decision = engine.step(&extreme, flat()).unwrap();
        assert!((decision.crash_intensity - 100.0).abs() < 1e-9);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::CrashLiquidation);
        assert!(engine.recovery().is_active());

        let decision = engine.step(&record(2), flat()).unwrap();
        assert_eq!(decision.reason, DecisionReason::RecoveryRamp);
        assert_eq!(engine.recovery().state().days_in_cash, 1);
    }

    /// Long, CIS 100 exit, then calm records until the ramp sits at 25%
    fn ramping_engine() -> StrategyEngine {
        let mut engine = engine(SizingMode::Intensity);
        engine.step(&long_entry(0), flat()).unwrap();

        let extreme = FeatureRecord {
            duvol: 1.0,
            ncskew: 4.0,
            vol_short: 0.08,
            index_return: -0.05,
            recent_return: -0.2,
            ..record(1)
        };
        engine.step(&extreme, flat()).unwrap();

        for day in 2..4 {
            engine.step(&record(day), flat()).unwrap();
        }
        let calm = FeatureRecord {
            price: 105.0,
            vol_short: 0.01,
            ..record(4)
        };
        let decision = engine.step(&calm, flat()).unwrap();
        assert_eq!(decision.target_fraction, 0.25);
        assert_eq!(engine.recovery().state().step_index, 1);
        engine
    }

    #[test]
    fn test_crash_during_ramp_restarts_episode() {
        let mut engine = ramping_engine();

        let crash = FeatureRecord {
            canary: true,
            ..record(5)
        };
        let decision = engine.step(&crash, flat()).unwrap();
        assert_eq!(decision.regime, MarketRegime::Crash);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::CrashLiquidation);
        assert_eq!(
            engine.recovery().state(),
            crate::recovery::RecoveryRampState {
                active: true,
                step_index: 0,
                days_in_cash: 0
            }
        );
    }

    #[test]
    fn test_crash_on_degraded_record_still_liquidates() {
        let mut engine = ramping_engine();

        let crash = FeatureRecord {
            canary: true,
            ncskew: f64::NAN,
            ..record(5)
        };
        let decision = engine.step(&crash, flat()).unwrap();
        assert!(decision.degraded);
        assert_eq!(decision.regime, MarketRegime::Crash);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::CrashLiquidation);
        assert_eq!(engine.recovery().state().step_index, 0);
        assert_eq!(engine.recovery().state().days_in_cash, 0);

        // The next step is Recovery, and the ramp starts over from the dwell
        let decision = engine.step(&record(6), flat()).unwrap();
        assert_eq!(decision.regime, MarketRegime::Recovery);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(engine.recovery().state().days_in_cash, 1);
    }

    #[test]
    fn test_degraded_crash_in_regime_mode_liquidates_same_step() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let crash = FeatureRecord {
            canary: true,
            rsi: f64::NAN,
            ..record(1)
        };
        let decision = engine.step(&crash, flat()).unwrap();
        assert!(decision.degraded);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::CrashLiquidation);

        // Trend was reset: back in Normal the engine waits for a new entry
        for day in 2..4 {
            let mut calm = record(day);
            calm.vol_short = 0.01;
            engine.step(&calm, flat()).unwrap();
        }
        assert_eq!(engine.regime(), MarketRegime::Normal);
        let decision = engine.step(&record(4), flat()).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::TrendSignal);
    }

    #[test]
    fn test_calm_market_completes_ramp_and_trend_resumes() {
        let mut engine = ramping_engine();

        let mut fractions = Vec::new();
        for day in 5..8 {
            let calm = FeatureRecord {
                price: 105.0,
                vol_short: 0.01,
                ..record(day)
            };
            let decision = engine.step(&calm, flat()).unwrap();
            assert_eq!(decision.reason, DecisionReason::RecoveryRamp);
            fractions.push(decision.target_fraction);
        }
        assert_eq!(fractions, vec![0.50, 0.75, 1.0]);
        assert!(!engine.recovery().is_active());

        let decision = engine.step(&record(8), flat()).unwrap();
        assert_eq!(decision.target_fraction, 1.0);
        assert_eq!(decision.reason, DecisionReason::TrendSignal);
    }

    #[test]
    fn test_stop_loss_overrides_everything() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let losing = PortfolioSignal {
            position_return: Some(-0.05),
            drawdown: 0.05,
        };
        let decision = engine.step(&long_entry(1), losing).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::StopLoss);

        // Flat afterwards until a fresh LONG signal
        let decision = engine.step(&record(2), flat()).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
    }

    #[test]
    fn test_drawdown_breaker_latches_until_cleared() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let deep = PortfolioSignal {
            position_return: Some(-0.01),
            drawdown: 0.30,
        };
        let decision = engine.step(&long_entry(1), deep).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::DrawdownBreaker);

        for day in 2..6 {
            let decision = engine.step(&long_entry(day), flat()).unwrap();
            assert_eq!(decision.target_fraction, 0.0);
            assert_eq!(decision.reason, DecisionReason::DrawdownBreaker);
        }

        engine.clear_drawdown_breaker();
        let decision = engine.step(&long_entry(6), flat()).unwrap();
        assert_eq!(decision.target_fraction, 1.0);
    }

    #[test]
    fn test_degraded_step_holds_previous_fraction() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let mut broken = record(1);
        broken.rsi = f64::NAN;
        broken.vol_long = f64::NAN;
        let decision = engine.step(&broken, flat()).unwrap();
        assert!(decision.degraded);
        assert_eq!(decision.target_fraction, 1.0);
        assert_eq!(decision.reason, DecisionReason::TrendSignal);
    }

    #[test]
    fn test_degraded_step_still_honours_overrides() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();

        let mut broken = record(1);
        broken.duvol = f64::NAN;
        let losing = PortfolioSignal {
            position_return: Some(-0.08),
            drawdown: 0.08,
        };
        let decision = engine.step(&broken, losing).unwrap();
        assert!(decision.degraded);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::StopLoss);
    }

    #[test]
    fn test_out_of_order_rejected_without_state_change() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(5), flat()).unwrap();

        let result = engine.step(&record(5), flat());
        assert!(matches!(result, Err(EngineError::OutOfOrder { .. })));
        let result = engine.step(&record(3), flat());
        assert!(matches!(result, Err(EngineError::OutOfOrder { .. })));

        let decision = engine.step(&record(6), flat()).unwrap();
        assert_eq!(decision.target_fraction, 1.0);
    }

    #[test]
    fn test_reset_returns_to_initial_state() {
        let mut engine = engine(SizingMode::Regime);
        engine.step(&long_entry(0), flat()).unwrap();
        engine.reset();

        // Earlier timestamps are accepted again
        let decision = engine.step(&record(0), flat()).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(engine.regime(), MarketRegime::Normal);
    }

    #[test]
    fn test_run_feeds_signal_per_step() {
        let mut engine = engine(SizingMode::Regime);
        let records: Vec<FeatureRecord> = (0..4).map(long_entry).collect();

        let decisions = engine
            .run(&records, |i, _| PortfolioSignal {
                position_return: if i == 2 { Some(-0.06) } else { None },
                drawdown: 0.0,
            })
            .unwrap();

        let fractions: Vec<f64> = decisions.iter().map(|d| d.target_fraction).collect();
        assert_eq!(fractions, vec![1.0, 1.0, 0.0, 1.0]);
        assert_eq!(decisions[2].reason, DecisionReason::StopLoss);
    }
}
