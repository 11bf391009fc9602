// Technical and crash-asymmetry indicators
// RSI and SMA for the trend signal, volatility, DUVOL and NCSKEW for crash risk

pub mod moving_average;
pub mod rsi;
pub mod volatility;

pub use moving_average::{calculate_sma, ma_crossover_sign};
pub use rsi::calculate_rsi;
pub use volatility::{calculate_duvol, calculate_ncskew, calculate_std_dev};
