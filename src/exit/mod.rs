// =============================================================================
// Exit Management Module
// =============================================================================
//
// Per-position stop-loss / take-profit / trailing-stop / time-stop barrier
// tracking, evaluated bar by bar inside the backtest executor's loop.

pub mod triple_barrier;
