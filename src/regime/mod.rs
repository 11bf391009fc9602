// Market regime detection module
pub mod detector;

pub use detector::{transition, MarketRegime, RegimeConfig, RegimeDetector, RegimeUpdate};
