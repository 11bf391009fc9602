// Core modules
pub mod backtest;
pub mod config;
pub mod error;
pub mod features;
pub mod indicators;
pub mod intensity;
pub mod models;
pub mod recovery;
pub mod regime;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::{AppConfig, SizingMode, StrategyConfig};
pub use error::{ConfigError, EngineError};
pub use models::*;
pub use regime::MarketRegime;
pub use strategy::{Strategy, StrategyEngine};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
