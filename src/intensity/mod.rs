// Crash Intensity Score module
pub mod scorer;

pub use scorer::{CrashIntensity, CrashIntensityScorer, IntensityConfig, IntensityWeights};
