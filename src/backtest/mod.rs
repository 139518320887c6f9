// =============================================================================
// Backtest pipeline — instrument/data lookup through PnL aggregation
// =============================================================================

pub mod executor;
pub mod pnl;
pub mod profile;
pub mod session;
pub mod validate;

pub use executor::{build_config_snapshot, config_hash, run, BacktestRequest};
