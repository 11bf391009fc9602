// Trading strategy module
pub mod buy_and_hold;
pub mod engine;
pub mod signals;

pub use buy_and_hold::BuyAndHoldStrategy;
pub use engine::StrategyEngine;
pub use signals::{trend_signal, volatility_target_size, TrendConfig};

use crate::config::SizingMode;
use crate::error::EngineError;
use crate::models::{FeatureRecord, PortfolioSignal, PositionDecision};

/// Anything the backtester can drive one record at a time
pub trait Strategy: Send {
    /// Decide the target fraction for this record
    fn decide(
        &mut self,
        record: &FeatureRecord,
        portfolio: PortfolioSignal,
    ) -> Result<PositionDecision, EngineError>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Forget all per-run state
    fn reset(&mut self);
}

impl Strategy for StrategyEngine {
    fn decide(
        &mut self,
        record: &FeatureRecord,
        portfolio: PortfolioSignal,
    ) -> Result<PositionDecision, EngineError> {
        self.step(record, portfolio)
    }

    fn name(&self) -> &str {
        match self.config().mode {
            SizingMode::Regime => "CrashGuard-Regime",
            SizingMode::Intensity => "CrashGuard-Intensity",
        }
    }

    fn reset(&mut self) {
        StrategyEngine::reset(self);
    }
}
