use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crashguard::backtest::{
    AssetSleeve, BacktestResult, BacktestRunner, MarketScenario, PortfolioRunner,
    SyntheticDataGenerator,
};
use crashguard::features::FeaturePipeline;
use crashguard::strategy::BuyAndHoldStrategy;
use crashguard::{AppConfig, PriceBar, SizingMode, StrategyEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crashguard")]
#[command(about = "Crash-aware regime/risk engine: backtests on synthetic or recorded daily bars")]
#[command(version)]
struct Args {
    /// TOML configuration file (CRASHGUARD__* variables override it)
    #[arg(long, env = "CRASHGUARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the configured sizing mode
    #[arg(long, value_enum, global = true)]
    mode: Option<SizingMode>,

    /// Print results as JSON instead of the report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backtest one asset against buy & hold
    Backtest {
        /// Synthetic market to generate when no price file is given
        #[arg(long, value_enum, default_value = "flash-crash")]
        scenario: MarketScenario,

        /// JSON array of price bars ({timestamp, close, index_close})
        #[arg(long)]
        prices: Option<PathBuf>,

        #[arg(long, default_value_t = 500)]
        days: usize,

        #[arg(long, env = "CRASHGUARD_SEED", default_value_t = 42)]
        seed: u64,
    },

    /// Fixed-weight multi-asset backtest, one engine per asset
    Portfolio {
        /// SYMBOL=WEIGHT pairs, e.g. BTC=0.6
        #[arg(long = "asset", value_parser = parse_allocation, required = true)]
        assets: Vec<(String, f64)>,

        /// Directory holding <SYMBOL>.json price files; synthetic data otherwise
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "flash-crash")]
        scenario: MarketScenario,

        #[arg(long, default_value_t = 500)]
        days: usize,

        #[arg(long, env = "CRASHGUARD_SEED", default_value_t = 42)]
        seed: u64,
    },
}

fn parse_allocation(raw: &str) -> Result<(String, f64), String> {
    let (symbol, weight) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=WEIGHT, got '{}'", raw))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|e| format!("bad weight '{}': {}", weight, e))?;
    Ok((symbol.trim().to_uppercase(), weight))
}

/// Distinct seed per synthetic sleeve, wrapping at the top of the range
fn sleeve_seed(seed: u64, slot: usize) -> u64 {
    seed.wrapping_add(slot as u64)
}

fn load_bars(path: &Path) -> anyhow::Result<Vec<PriceBar>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading price file {}", path.display()))?;
    let bars: Vec<PriceBar> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing price file {}", path.display()))?;
    if bars.is_empty() {
        bail!("price file {} holds no bars", path.display());
    }
    Ok(bars)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crashguard=info")),
        )
        .init();

    let args = Args::parse();

    let mut app = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(mode) = args.mode {
        app.strategy = app.strategy.with_mode(mode);
    }
    tracing::info!("Sizing mode: {:?}", app.strategy.mode);

    match args.command {
        Command::Backtest {
            scenario,
            prices,
            days,
            seed,
        } => {
            let (bars, label) = match prices {
                Some(path) => (load_bars(&path)?, path.display().to_string()),
                None => (
                    SyntheticDataGenerator::new(seed).generate(scenario, days),
                    scenario.label().to_string(),
                ),
            };
            run_single(&app, &bars, &label, args.json)
        }
        Command::Portfolio {
            assets,
            data_dir,
            scenario,
            days,
            seed,
        } => {
            let mut sleeves = Vec::with_capacity(assets.len());
            for (slot, (symbol, allocation)) in assets.into_iter().enumerate() {
                let bars = match &data_dir {
                    Some(dir) => load_bars(&dir.join(format!("{}.json", symbol)))?,
                    None => SyntheticDataGenerator::new(sleeve_seed(seed, slot)).generate(scenario, days),
                };
                sleeves.push(AssetSleeve {
                    symbol,
                    allocation,
                    bars,
                });
            }
            run_portfolio(&app, sleeves, args.json).await
        }
    }
}

fn run_single(app: &AppConfig, bars: &[PriceBar], label: &str, json: bool) -> anyhow::Result<()> {
    let pipeline = FeaturePipeline::new(app.features.clone());
    let records = pipeline.generate(bars);
    if records.is_empty() {
        bail!(
            "need more than {} bars after warm-up, got {}",
            pipeline.config().warmup(),
            bars.len()
        );
    }

    let runner = BacktestRunner::new(app.backtest.clone());
    let mut engine = StrategyEngine::new(app.strategy.clone())?;
    let mut benchmark = BuyAndHoldStrategy::new();

    if json {
        let result = runner.run(&mut engine, &records).map_err(|e| anyhow::anyhow!(e))?;
        let baseline = runner.run(&mut benchmark, &records).map_err(|e| anyhow::anyhow!(e))?;
        let out = serde_json::json!({
            "source": label,
            "strategy": result,
            "benchmark": baseline.metrics,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          CRASHGUARD BACKTEST                         ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let result = runner
        .run_and_report(&mut engine, &records, label)
        .map_err(|e| anyhow::anyhow!(e))?;
    let baseline = runner
        .run_and_report(&mut benchmark, &records, label)
        .map_err(|e| anyhow::anyhow!(e))?;

    print_versus(&result, &baseline);
    Ok(())
}

async fn run_portfolio(app: &AppConfig, sleeves: Vec<AssetSleeve>, json: bool) -> anyhow::Result<()> {
    let runner = PortfolioRunner::new(
        app.strategy.clone(),
        app.features.clone(),
        app.backtest.clone(),
    );
    let result = runner.run(sleeves).await.map_err(|e| anyhow::anyhow!(e))?;

    if json {
        let out = serde_json::json!({
            "portfolio": result.metrics,
            "benchmark": result.benchmark,
            "assets": result.sleeves.iter().map(|s| serde_json::json!({
                "symbol": s.symbol,
                "allocation": s.allocation,
                "strategy": s.strategy.metrics,
                "benchmark": s.benchmark.metrics,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          CRASHGUARD PORTFOLIO                        ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<8} {:>7} {:>10} {:>10} {:>10} {:>10}",
        "Asset", "Weight", "Return%", "MaxDD%", "B&H Ret%", "B&H DD%"
    );
    println!("{}", "─".repeat(60));
    for sleeve in &result.sleeves {
        let m = &sleeve.strategy.metrics;
        let b = &sleeve.benchmark.metrics;
        println!(
            "{:<8} {:>6.0}% {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            sleeve.symbol,
            sleeve.allocation * 100.0,
            m.total_return_pct,
            m.max_drawdown_pct,
            b.total_return_pct,
            b.max_drawdown_pct
        );
    }

    result.metrics.print_report();
    result.benchmark.print_report();
    Ok(())
}

fn print_versus(result: &BacktestResult, baseline: &BacktestResult) {
    let m = &result.metrics;
    let b = &baseline.metrics;

    println!("\n{:<22} {:>14} {:>14}", "", m.strategy, b.strategy);
    println!("{}", "─".repeat(52));
    println!(
        "{:<22} {:>13.2}% {:>13.2}%",
        "Total Return", m.total_return_pct, b.total_return_pct
    );
    println!(
        "{:<22} {:>13.2}% {:>13.2}%",
        "Max Drawdown", m.max_drawdown_pct, b.max_drawdown_pct
    );
    println!("{:<22} {:>14.2} {:>14.2}", "Sharpe", m.sharpe_ratio, b.sharpe_ratio);
    println!("{:<22} {:>14.2} {:>14.2}", "CSI", m.csi, b.csi);

    let saved = b.max_drawdown_pct - m.max_drawdown_pct;
    if saved > 0.0 {
        println!("\n🛡️  Drawdown reduced by {:.2} points", saved);
    } else {
        println!("\n⚠️  No drawdown improvement over buy & hold");
    }
}
