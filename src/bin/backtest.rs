use crashguard::backtest::{BacktestMetrics, BacktestRunner, MarketScenario, SyntheticDataGenerator};
use crashguard::features::FeaturePipeline;
use crashguard::strategy::BuyAndHoldStrategy;
use crashguard::{AppConfig, Result, SizingMode, StrategyEngine};

const DAYS: usize = 500;
const SEED: u64 = 42;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("crashguard=info")
        .init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          CRASHGUARD BACKTESTING SUITE                ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    // Configuration
    let app = AppConfig::load(None)?;
    let pipeline = FeaturePipeline::new(app.features.clone());
    let runner = BacktestRunner::new(app.backtest.clone());

    let mut all_metrics = Vec::new();

    for scenario in MarketScenario::all() {
        // Same bars for every strategy in a scenario
        let bars = SyntheticDataGenerator::new(SEED).generate(scenario, DAYS);
        let records = pipeline.generate(&bars);

        let mut regime = StrategyEngine::new(app.strategy.clone().with_mode(SizingMode::Regime))?;
        let mut intensity =
            StrategyEngine::new(app.strategy.clone().with_mode(SizingMode::Intensity))?;
        let mut benchmark = BuyAndHoldStrategy::new();

        let runs = [
            runner.run_and_report(&mut regime, &records, scenario.label()),
            runner.run_and_report(&mut intensity, &records, scenario.label()),
            runner.run_and_report(&mut benchmark, &records, scenario.label()),
        ];

        for run in runs {
            match run {
                Ok(result) => all_metrics.push((scenario.label().to_string(), result.metrics)),
                Err(e) => eprintln!("❌ Backtest failed for {}: {}", scenario.label(), e),
            }
        }
    }

    // Summary comparison
    print_summary_comparison(&all_metrics);

    Ok(())
}

fn print_summary_comparison(results: &[(String, BacktestMetrics)]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<30} {:<22} {:>9} {:>9} {:>8} {:>7}",
        "Scenario", "Strategy", "Return%", "MaxDD%", "Sharpe", "Trades"
    );
    println!("{}", "─".repeat(90));

    for (name, metrics) in results {
        println!(
            "{:<30} {:<22} {:>9.2} {:>9.2} {:>8.2} {:>7}",
            name,
            metrics.strategy,
            metrics.total_return_pct,
            metrics.max_drawdown_pct,
            metrics.sharpe_ratio,
            metrics.total_trades
        );
    }

    println!("\n");

    // Find best/worst drawdown protection
    if let Some((best_name, best_metrics)) = results
        .iter()
        .min_by(|a, b| a.1.max_drawdown_pct.total_cmp(&b.1.max_drawdown_pct))
    {
        println!(
            "🏆 Shallowest Drawdown: {} / {} ({:.2}%)",
            best_name, best_metrics.strategy, best_metrics.max_drawdown_pct
        );
    }

    if let Some((worst_name, worst_metrics)) = results
        .iter()
        .max_by(|a, b| a.1.max_drawdown_pct.total_cmp(&b.1.max_drawdown_pct))
    {
        println!(
            "⚠️  Deepest Drawdown: {} / {} ({:.2}%)",
            worst_name, worst_metrics.strategy, worst_metrics.max_drawdown_pct
        );
    }

    // Overall statistics
    let total_trades: usize = results.iter().map(|(_, m)| m.total_trades).sum();
    let breaker_trips: usize = results.iter().map(|(_, m)| m.breaker_trips).sum();
    let stop_losses: usize = results.iter().map(|(_, m)| m.stop_loss_exits).sum();

    println!("\n📊 Overall Statistics:");
    println!("   Total Trades Across All Scenarios: {}", total_trades);
    println!("   Stop-Loss Exits: {}", stop_losses);
    println!("   Drawdown Breaker Trips: {}", breaker_trips);

    println!("\n═══════════════════════════════════════════════════════\n");
}
