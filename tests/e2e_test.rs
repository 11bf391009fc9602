use chrono::{DateTime, Duration, TimeZone, Utc};
use crashguard::backtest::{BacktestRunner, MarketScenario, SyntheticDataGenerator};
use crashguard::features::FeaturePipeline;
use crashguard::intensity::CrashIntensityScorer;
use crashguard::recovery::{AdaptiveRecoveryEngine, RecoveryConfig};
use crashguard::regime::RegimeDetector;
use crashguard::strategy::BuyAndHoldStrategy;
use crashguard::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn calm(n: i64) -> FeatureRecord {
    FeatureRecord {
        duvol: 0.1,
        ..FeatureRecord::neutral(day(n))
    }
}

fn long_entry(n: i64) -> FeatureRecord {
    FeatureRecord {
        rsi: 25.0,
        ma_crossover: 1,
        ..FeatureRecord::neutral(day(n))
    }
}

/// Every crash input saturated: CIS 100
fn extreme(n: i64) -> FeatureRecord {
    FeatureRecord {
        duvol: 1.0,
        ncskew: 4.0,
        vol_short: 0.08,
        index_return: -0.05,
        recent_return: -0.2,
        ..FeatureRecord::neutral(day(n))
    }
}

fn engine(mode: SizingMode) -> StrategyEngine {
    StrategyEngine::new(StrategyConfig::default().with_mode(mode)).unwrap()
}

/// Uniform in [lo, hi), NaN one time in twenty
fn pick(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if rng.gen_bool(0.05) {
        f64::NAN
    } else {
        rng.gen_range(lo..hi)
    }
}

fn random_record(rng: &mut StdRng, n: i64) -> FeatureRecord {
    FeatureRecord {
        timestamp: day(n),
        price: rng.gen_range(50.0..150.0),
        ma_short: rng.gen_range(50.0..150.0),
        duvol: pick(rng, -3.0, 3.0),
        ncskew: pick(rng, -10.0, 10.0),
        vol_short: pick(rng, 0.0, 0.2),
        vol_long: if rng.gen_bool(0.1) {
            0.0
        } else {
            pick(rng, -0.01, 0.2)
        },
        rsi: pick(rng, 0.0, 100.0),
        ma_crossover: rng.gen_range(-1..=1),
        canary: rng.gen_bool(0.1),
        recent_return: pick(rng, -0.5, 0.5),
        index_return: pick(rng, -0.2, 0.2),
    }
}

#[test]
fn test_scenario_single_duvol_spike() {
    let _ = tracing_subscriber::fmt::try_init();

    // Step 5 spikes DUVOL, volatility stays elevated for two steps, then calms
    let records: Vec<FeatureRecord> = (1..=10)
        .map(|n| {
            let mut record = calm(n);
            if n == 5 {
                record.duvol = 0.6;
            }
            if n >= 8 {
                record.vol_short = 0.015;
            }
            record
        })
        .collect();

    let regimes = RegimeDetector::default().detect_regimes(&records);

    use MarketRegime::*;
    assert_eq!(
        regimes,
        vec![Normal, Normal, Normal, Normal, Crash, Recovery, Recovery, Normal, Normal, Normal]
    );

    // The engine reports the same path
    let mut engine = engine(SizingMode::Regime);
    let decisions = engine.run(&records, |_, _| PortfolioSignal::default()).unwrap();
    let reported: Vec<MarketRegime> = decisions.iter().map(|d| d.regime).collect();
    assert_eq!(reported, regimes);
}

#[test]
fn test_scenario_duvol_only_intensity() {
    let scorer = CrashIntensityScorer::default();
    let record = FeatureRecord {
        duvol: 1.0, // Saturates the DUVOL component
        ..FeatureRecord::neutral(day(0))
    };

    let breakdown = scorer.evaluate(&record);
    assert_eq!(breakdown.duvol, 100.0);
    assert_eq!(breakdown.ncskew, 0.0);
    assert_eq!(breakdown.vol_spike, 0.0);
    assert_eq!(breakdown.canary, 0.0);
    assert_eq!(breakdown.momentum, 0.0);
    assert!((breakdown.score - 25.0).abs() < 1e-9);

    let fraction = scorer.proportional_fraction(breakdown.score);
    assert!((fraction - 0.9167).abs() < 1e-4, "got {}", fraction);
}

#[test]
fn test_scenario_recovery_ramp_waits_for_dwell() {
    let mut engine = engine(SizingMode::Intensity);

    let decision = engine.step(&long_entry(0), PortfolioSignal::default()).unwrap();
    assert_eq!(decision.target_fraction, 1.0);

    // Step t: CIS saturates and forces the exit
    let decision = engine.step(&extreme(1), PortfolioSignal::default()).unwrap();
    assert_eq!(decision.crash_intensity, 100.0);
    assert_eq!(decision.target_fraction, 0.0);
    assert_eq!(decision.reason, DecisionReason::CrashLiquidation);
    assert_eq!(engine.recovery().state().days_in_cash, 0);

    // t+1, t+2: only calm CIS and RSI, score 0.45
    for (n, expected_days) in [(2, 1), (3, 2)] {
        let decision = engine
            .step(&FeatureRecord::neutral(day(n)), PortfolioSignal::default())
            .unwrap();
        let state = engine.recovery().state();
        assert_eq!(state.days_in_cash, expected_days);
        assert_eq!(state.step_index, 0);
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::RecoveryRamp);
    }

    // t+3: price above MA, volatility and CIS down from t, RSI neutral
    let recovering = FeatureRecord {
        price: 105.0,
        ..FeatureRecord::neutral(day(4))
    };
    let decision = engine.step(&recovering, PortfolioSignal::default()).unwrap();
    let state = engine.recovery().state();
    assert_eq!(state.days_in_cash, 3);
    assert_eq!(state.step_index, 1);
    assert_eq!(decision.target_fraction, 0.25);
    assert_eq!(decision.reason, DecisionReason::RecoveryRamp);
}

#[test]
fn test_scenario_drawdown_breaker_latches() {
    let mut engine = engine(SizingMode::Regime);
    engine.step(&long_entry(0), PortfolioSignal::default()).unwrap();

    let at_limit = PortfolioSignal {
        position_return: Some(0.01),
        drawdown: 0.30,
    };
    let decision = engine.step(&long_entry(1), at_limit).unwrap();
    assert_eq!(decision.target_fraction, 0.0);
    assert_eq!(decision.reason, DecisionReason::DrawdownBreaker);

    // Drawdown gone and the trend still says long: breaker holds
    for n in 2..8 {
        let decision = engine.step(&long_entry(n), PortfolioSignal::default()).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::DrawdownBreaker);
    }
    assert!(engine.is_drawdown_breaker_tripped());

    engine.clear_drawdown_breaker();
    let decision = engine.step(&long_entry(8), PortfolioSignal::default()).unwrap();
    assert_eq!(decision.target_fraction, 1.0);
}

#[test]
fn test_stop_loss_overrides_every_signal() {
    let stopped = PortfolioSignal {
        position_return: Some(-0.06),
        drawdown: 0.06,
    };

    for mode in [SizingMode::Regime, SizingMode::Intensity] {
        let mut engine = engine(mode);
        engine.step(&long_entry(0), PortfolioSignal::default()).unwrap();

        // Fresh long signal on the same step
        let decision = engine.step(&long_entry(1), stopped).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::StopLoss);

        // Concurrent crash signal
        let decision = engine.step(&extreme(2), stopped).unwrap();
        assert_eq!(decision.target_fraction, 0.0);
        assert_eq!(decision.reason, DecisionReason::StopLoss);
    }
}

#[test]
fn test_random_records_keep_engine_invariants() {
    let mut rng = StdRng::seed_from_u64(7);

    for mode in [SizingMode::Regime, SizingMode::Intensity] {
        let mut engine = engine(mode);
        let scorer = CrashIntensityScorer::default();
        let mut previous: Option<PositionDecision> = None;

        for n in 0..2000 {
            let record = random_record(&mut rng, n);
            let signal = PortfolioSignal {
                position_return: if rng.gen_bool(0.5) {
                    Some(rng.gen_range(-0.1..0.1))
                } else {
                    None
                },
                drawdown: rng.gen_range(0.0..0.25),
            };
            let stop = signal.position_return.map_or(false, |r| r <= -0.05);
            let regime_before = engine.regime();

            let decision = engine.step(&record, signal).unwrap();

            assert!((0.0..=1.0).contains(&decision.target_fraction));
            assert!((0.0..=100.0).contains(&decision.crash_intensity));
            assert_eq!(
                decision.crash_intensity.to_bits(),
                scorer.score(&record).to_bits()
            );

            if stop {
                assert_eq!(decision.target_fraction, 0.0);
                assert_eq!(decision.reason, DecisionReason::StopLoss);
            }

            if let Some(prev) = &previous {
                assert!(
                    !(prev.regime == MarketRegime::Crash && decision.regime == MarketRegime::Crash),
                    "two consecutive crash steps at {}",
                    n
                );
            }

            if regime_before == MarketRegime::Recovery
                && decision.regime == MarketRegime::Normal
            {
                assert!(record.vol_long > 0.0);
            }

            if decision.degraded && !stop {
                let fresh_crash = regime_before != MarketRegime::Crash
                    && decision.regime == MarketRegime::Crash;
                if fresh_crash {
                    assert_eq!(decision.target_fraction, 0.0);
                    assert_eq!(decision.reason, DecisionReason::CrashLiquidation);
                } else {
                    let prev = previous.as_ref().map_or(0.0, |p| p.target_fraction);
                    assert_eq!(decision.target_fraction, prev);
                }
            }

            previous = Some(decision);
        }
    }
}

#[test]
fn test_random_recovery_never_advances_early() {
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..200 {
        let mut ramp = AdaptiveRecoveryEngine::new(RecoveryConfig::default());
        ramp.enter_cash();

        for _ in 0..20 {
            ramp.advance(rng.gen_range(0.0..1.0));
            let state = ramp.state();
            if state.step_index > 0 || !state.active {
                assert!(state.days_in_cash >= 3);
            }
        }
    }
}

#[test]
fn test_out_of_order_record_rejected() {
    let mut engine = engine(SizingMode::Regime);
    engine.step(&calm(5), PortfolioSignal::default()).unwrap();

    let err = engine.step(&calm(5), PortfolioSignal::default()).unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { .. }));

    // Rejection leaves the engine usable
    assert!(engine.step(&calm(6), PortfolioSignal::default()).is_ok());
}

#[test]
fn test_flash_crash_backtest_is_flat_through_the_crash() {
    let num_days = 500;
    let bars = SyntheticDataGenerator::new(42).generate(MarketScenario::FlashCrash, num_days);
    let crash_start = num_days * 55 / 100;
    let danger = bars[crash_start - 2].timestamp..=bars[crash_start + 5].timestamp;

    let pipeline = FeaturePipeline::new(Default::default());
    let runner = BacktestRunner::default();

    let mut guarded = engine(SizingMode::Regime);
    let result = runner.run_bars(&mut guarded, &pipeline, &bars).unwrap();
    let baseline = runner
        .run_bars(&mut BuyAndHoldStrategy::new(), &pipeline, &bars)
        .unwrap();

    let in_crash: Vec<&PositionDecision> = result
        .decisions
        .iter()
        .filter(|d| danger.contains(&d.timestamp))
        .collect();
    assert_eq!(in_crash.len(), 8);
    assert!(in_crash.iter().all(|d| d.target_fraction == 0.0));
    assert!(in_crash.iter().any(|d| d.regime == MarketRegime::Crash));

    assert!(baseline.metrics.max_drawdown_pct > 30.0);
    assert!(result.metrics.regime_days.crash > 0);
    assert_eq!(result.decisions.len(), baseline.decisions.len());
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("crashguard-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        r#"
[strategy]
mode = "intensity"

[strategy.intensity]
lower_breakpoint = 25.0

[strategy.risk]
drawdown_breaker_pct = 0.25

[backtest]
initial_capital = 50000.0
"#,
    )
    .unwrap();

    let app = AppConfig::load(Some(&path)).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(app.strategy.mode, SizingMode::Intensity);
    assert_eq!(app.strategy.intensity.lower_breakpoint, 25.0);
    assert_eq!(app.strategy.intensity.upper_breakpoint, 80.0);
    assert_eq!(app.strategy.risk.drawdown_breaker_pct, 0.25);
    assert_eq!(app.backtest.initial_capital, 50_000.0);
    assert!(StrategyEngine::new(app.strategy).is_ok());
}

#[test]
fn test_config_file_rejects_bad_values() {
    let path = std::env::temp_dir().join(format!("crashguard-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        r#"
[strategy.intensity]
lower_breakpoint = 90.0
"#,
    )
    .unwrap();

    let result = AppConfig::load(Some(&path));
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(ConfigError::Inverted { .. })));
}
