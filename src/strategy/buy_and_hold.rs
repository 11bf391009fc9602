use super::Strategy;
use crate::error::EngineError;
use crate::models::{DecisionReason, FeatureRecord, PortfolioSignal, PositionDecision};
use crate::regime::MarketRegime;

/// Buy-and-Hold baseline
///
/// Fully invested from the first record and never exits, ignoring the
/// portfolio signal. Used as the benchmark every crash-aware run is compared to.
#[derive(Debug, Clone, Default)]
pub struct BuyAndHoldStrategy;

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn decide(
        &mut self,
        record: &FeatureRecord,
        _portfolio: PortfolioSignal,
    ) -> Result<PositionDecision, EngineError> {
        Ok(PositionDecision {
            timestamp: record.timestamp,
            target_fraction: 1.0,
            reason: DecisionReason::TrendSignal,
            regime: MarketRegime::Normal,
            crash_intensity: 0.0,
            degraded: false,
        })
    }

    fn name(&self) -> &str {
        "BuyAndHold"
    }

    fn reset(&mut self) {}
}
