// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Incremental, side-effect-free state machines for the indicators the entry
// condition predicates and regime detector read. Each indicator owns a
// `warm_up(history)` step seeded from a backfill window and an `update(...)`
// step fed one bar at a time by the backtest executor's loop, rather than a
// batch function recomputed over the full series on every bar.

pub mod atr;
pub mod ema;
pub mod momentum;
pub mod rsi;
pub mod sma;
pub mod state;
pub mod vwap;

pub use state::IndicatorSuite;
