// Adaptive recovery ramp after a full liquidation
pub mod ramp;

pub use ramp::{AdaptiveRecoveryEngine, RecoveryConfig, RecoveryRampState, RAMP_FRACTIONS};
