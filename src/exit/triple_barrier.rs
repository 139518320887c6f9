// =============================================================================
// Position exit barriers — stop-loss / take-profit / trailing stop / time stop
// =============================================================================
//
// Checked in a fixed order every bar a position is open: stop-loss first,
// then take-profit, then trailing stop, then time stop. Exit price is always
// the triggering level itself (rounded to the instrument's tick), never the
// bar's open/close, since a backtest only sees bar-level OHLC and must pick
// a single deterministic fill price for the level it crossed.
//
// Stop-loss / take-profit are fixed at position open from `StrategyRules`'
// exit rule block. The trailing stop is optional and only begins moving once
// the position has been in profit for `activation_ticks`; once active it
// only ever tightens toward the market, the stop itself never retreats.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::round_to_tick;
use crate::types::Side;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    TimeStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::TrailingStop => write!(f, "TRAILING_STOP"),
            Self::TimeStop => write!(f, "TIME_STOP"),
        }
    }
}

/// Exit rules derived from a bot's `StrategyRules` at position open. The
/// trailing stop is optional (`None` disables it entirely); the time stop is
/// expressed in bars held, not wall-clock duration, matching the bar-by-bar
/// nature of the backtest loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRules {
    pub stop_loss_ticks: i64,
    pub take_profit_ticks: i64,
    pub trailing_stop: Option<TrailingStopConfig>,
    pub time_stop_bars: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    /// Ticks of profit before the trailing stop arms.
    pub activation_ticks: i64,
    /// Fixed distance (in ticks) the stop trails behind the extreme.
    pub trail_ticks: i64,
}

/// Live barrier tracking for one open position, one instance per trade.
#[derive(Debug, Clone)]
pub struct BarrierState {
    pub rules: ExitRules,
    pub side: Side,
    pub entry_price: Decimal,
    pub tick_size: Decimal,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    pub trailing_active: bool,
    pub highest_favorable: Decimal,
    pub bars_held: u32,
}

impl BarrierState {
    pub fn new(rules: ExitRules, side: Side, entry_price: Decimal, tick_size: Decimal) -> Self {
        let stop_price = match side {
            Side::Long => entry_price - tick_size * Decimal::from(rules.stop_loss_ticks),
            Side::Short => entry_price + tick_size * Decimal::from(rules.stop_loss_ticks),
        };
        let take_profit_price = match side {
            Side::Long => entry_price + tick_size * Decimal::from(rules.take_profit_ticks),
            Side::Short => entry_price - tick_size * Decimal::from(rules.take_profit_ticks),
        };
        Self {
            rules,
            side,
            entry_price,
            tick_size,
            stop_price: round_to_tick(stop_price, tick_size),
            take_profit_price: round_to_tick(take_profit_price, tick_size),
            trailing_active: false,
            highest_favorable: entry_price,
            bars_held: 0,
        }
    }

    /// Evaluate all four barriers against one new bar's OHLC, updating the
    /// trailing stop if configured. Returns the first barrier triggered, in
    /// stop-loss → take-profit → trailing-stop → time-stop priority, along
    /// with the fill price for that exit (the triggering level, tick
    /// rounded; the time stop fills at `bar_close` since it has no price
    /// level of its own).
    pub fn evaluate(
        &mut self,
        bar_high: Decimal,
        bar_low: Decimal,
        bar_close: Decimal,
    ) -> Option<(ExitReason, Decimal)> {
        self.bars_held += 1;
        self.update_trailing(bar_high, bar_low);

        match self.side {
            Side::Long => {
                if bar_low <= self.stop_price {
                    return Some((ExitReason::StopLoss, self.stop_price));
                }
                if bar_high >= self.take_profit_price {
                    return Some((ExitReason::TakeProfit, self.take_profit_price));
                }
                if self.trailing_active && bar_low <= self.stop_price {
                    return Some((ExitReason::TrailingStop, self.stop_price));
                }
            }
            Side::Short => {
                if bar_high >= self.stop_price {
                    return Some((ExitReason::StopLoss, self.stop_price));
                }
                if bar_low <= self.take_profit_price {
                    return Some((ExitReason::TakeProfit, self.take_profit_price));
                }
                if self.trailing_active && bar_high >= self.stop_price {
                    return Some((ExitReason::TrailingStop, self.stop_price));
                }
            }
        }

        if let Some(limit) = self.rules.time_stop_bars {
            if self.bars_held >= limit {
                return Some((ExitReason::TimeStop, round_to_tick(bar_close, self.tick_size)));
            }
        }

        None
    }

    /// Advance the trailing stop. Activates once price has moved
    /// `activation_ticks` in the position's favor; once active the stop only
    /// ever tightens toward the market, matching the fixed-distance trail —
    /// it never moves back out even if price retraces.
    fn update_trailing(&mut self, bar_high: Decimal, bar_low: Decimal) {
        let Some(cfg) = self.rules.trailing_stop else {
            return;
        };
        let activation_distance = self.tick_size * Decimal::from(cfg.activation_ticks);
        let trail_distance = self.tick_size * Decimal::from(cfg.trail_ticks);

        match self.side {
            Side::Long => {
                self.highest_favorable = self.highest_favorable.max(bar_high);
                let favorable_move = self.highest_favorable - self.entry_price;
                if !self.trailing_active && favorable_move >= activation_distance {
                    self.trailing_active = true;
                }
                if self.trailing_active {
                    let candidate = round_to_tick(self.highest_favorable - trail_distance, self.tick_size);
                    if candidate > self.stop_price {
                        self.stop_price = candidate;
                    }
                }
            }
            Side::Short => {
                self.highest_favorable = self.highest_favorable.min(bar_low);
                let favorable_move = self.entry_price - self.highest_favorable;
                if !self.trailing_active && favorable_move >= activation_distance {
                    self.trailing_active = true;
                }
                if self.trailing_active {
                    let candidate = round_to_tick(self.highest_favorable + trail_distance, self.tick_size);
                    if candidate < self.stop_price {
                        self.stop_price = candidate;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules(trailing: Option<TrailingStopConfig>, time_stop: Option<u32>) -> ExitRules {
        ExitRules {
            stop_loss_ticks: 10,
            take_profit_ticks: 20,
            trailing_stop: trailing,
            time_stop_bars: time_stop,
        }
    }

    #[test]
    fn long_stop_loss_triggers_on_bar_low() {
        let mut state = BarrierState::new(rules(None, None), Side::Long, dec!(4500), dec!(0.25));
        let result = state.evaluate(dec!(4500.50), dec!(4497.00), dec!(4498.00));
        assert_eq!(result, Some((ExitReason::StopLoss, state.stop_price)));
    }

    #[test]
    fn long_take_profit_triggers_on_bar_high() {
        let mut state = BarrierState::new(rules(None, None), Side::Long, dec!(4500), dec!(0.25));
        let result = state.evaluate(dec!(4505.50), dec!(4500.00), dec!(4503.00));
        assert_eq!(result, Some((ExitReason::TakeProfit, state.take_profit_price)));
    }

    #[test]
    fn short_stop_loss_triggers_on_bar_high() {
        let mut state = BarrierState::new(rules(None, None), Side::Short, dec!(4500), dec!(0.25));
        let result = state.evaluate(dec!(4503.00), dec!(4499.00), dec!(4501.00));
        assert_eq!(result, Some((ExitReason::StopLoss, state.stop_price)));
    }

    #[test]
    fn no_barrier_triggers_when_price_is_between() {
        let mut state = BarrierState::new(rules(None, None), Side::Long, dec!(4500), dec!(0.25));
        let result = state.evaluate(dec!(4501.00), dec!(4499.00), dec!(4500.00));
        assert_eq!(result, None);
    }

    #[test]
    fn time_stop_triggers_after_bar_limit() {
        let mut state = BarrierState::new(rules(None, Some(2)), Side::Long, dec!(4500), dec!(0.25));
        assert_eq!(state.evaluate(dec!(4501.00), dec!(4499.00), dec!(4500.00)), None);
        let result = state.evaluate(dec!(4501.00), dec!(4499.00), dec!(4500.00));
        assert!(matches!(result, Some((ExitReason::TimeStop, _))));
    }

    #[test]
    fn trailing_stop_activates_and_only_tightens() {
        let cfg = TrailingStopConfig { activation_ticks: 8, trail_ticks: 4 };
        let mut state = BarrierState::new(rules(Some(cfg), None), Side::Long, dec!(4500), dec!(0.25));

        // Move up 2 points (8 ticks), activating the trail.
        state.evaluate(dec!(4502.00), dec!(4501.00), dec!(4501.50));
        assert!(state.trailing_active);
        let armed_stop = state.stop_price;

        // Price retraces; the stop should not move back down.
        state.evaluate(dec!(4501.50), dec!(4500.50), dec!(4501.00));
        assert!(state.stop_price >= armed_stop);
    }

    #[test]
    fn stop_loss_is_checked_before_take_profit() {
        // A bar whose range spans both the stop and the take-profit price —
        // stop-loss must win (checked first) regardless of which looks
        // "more triggered" in magnitude.
        let mut state = BarrierState::new(rules(None, None), Side::Long, dec!(4500), dec!(0.25));
        let result = state.evaluate(dec!(4510.00), dec!(4490.00), dec!(4500.00));
        assert_eq!(result, Some((ExitReason::StopLoss, state.stop_price)));
    }
}
