// =============================================================================
// IndicatorSuite — the bundle of indicator state the backtest executor
// carries per open session and updates one bar at a time.
// =============================================================================
//
// Bundles every indicator an entry condition or confirmation predicate might
// reference: EMA 9/20/21, SMA 50, VWAP, RSI 14, ATR 14, 10-bar momentum, the
// running session high/low/open, and a 20-bar volume history (for relative
// volume comparisons in momentum/breakout conditions). `warm_up` consumes the
// first 50 bars of a session (the longest period any indicator here needs)
// before the executor starts evaluating entry conditions on bar 51 onward.
// =============================================================================

use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::bar_cache::Bar;

use super::atr::{AtrState, OhlcPoint};
use super::ema::EmaState;
use super::momentum::MomentumState;
use super::rsi::RsiState;
use super::sma::SmaState;
use super::vwap::VwapState;

pub const WARM_UP_BARS: usize = 50;
const VOLUME_HISTORY_LEN: usize = 20;

pub struct IndicatorSuite {
    pub ema9: EmaState,
    pub ema20: EmaState,
    pub ema21: EmaState,
    pub sma50: SmaState,
    pub vwap: VwapState,
    pub rsi14: RsiState,
    pub atr14: AtrState,
    pub momentum10: MomentumState,

    pub session_high: Option<Decimal>,
    pub session_low: Option<Decimal>,
    pub session_open: Option<Decimal>,
    volume_history: VecDeque<Decimal>,

    bars_seen: usize,
}

impl IndicatorSuite {
    pub fn new() -> Self {
        Self {
            ema9: EmaState::new(9),
            ema20: EmaState::new(20),
            ema21: EmaState::new(21),
            sma50: SmaState::new(50),
            vwap: VwapState::new(),
            rsi14: RsiState::new(14),
            atr14: AtrState::new(14),
            momentum10: MomentumState::new(10),
            session_high: None,
            session_low: None,
            session_open: None,
            volume_history: VecDeque::with_capacity(VOLUME_HISTORY_LEN),
            bars_seen: 0,
        }
    }

    /// Seed every indicator from the first `WARM_UP_BARS` bars of a session.
    /// `bars` must already be in chronological order.
    pub fn warm_up(&mut self, bars: &[Bar]) {
        let closes: Vec<f64> = bars.iter().map(|b| dec_f64(b.close)).collect();
        let points: Vec<OhlcPoint> = bars
            .iter()
            .map(|b| OhlcPoint { high: dec_f64(b.high), low: dec_f64(b.low), close: dec_f64(b.close) })
            .collect();

        self.ema9.warm_up(&closes);
        self.ema20.warm_up(&closes);
        self.ema21.warm_up(&closes);
        self.sma50.warm_up(&closes);
        self.rsi14.warm_up(&closes);
        self.atr14.warm_up(&points);
        self.momentum10.warm_up(&closes);

        if let Some(first) = bars.first() {
            self.session_open = Some(first.open);
        }
        for b in bars {
            self.vwap.update(dec_f64(b.high), dec_f64(b.low), dec_f64(b.close), dec_f64(b.volume));
            self.track_session_extremes(b);
            self.push_volume(b.volume);
        }
        self.bars_seen = bars.len();
    }

    /// Feed one new bar into every indicator.
    pub fn on_bar(&mut self, bar: &Bar) {
        let close = dec_f64(bar.close);
        self.ema9.update(close);
        self.ema20.update(close);
        self.ema21.update(close);
        self.sma50.update(close);
        self.rsi14.update(close);
        self.atr14.update(OhlcPoint { high: dec_f64(bar.high), low: dec_f64(bar.low), close });
        self.momentum10.update(close);
        self.vwap.update(dec_f64(bar.high), dec_f64(bar.low), close, dec_f64(bar.volume));

        if self.session_open.is_none() {
            self.session_open = Some(bar.open);
        }
        self.track_session_extremes(bar);
        self.push_volume(bar.volume);
        self.bars_seen += 1;
    }

    /// Clear the session-anchored pieces (VWAP, session extremes/open, volume
    /// history) at a trading-session boundary, leaving the rolling-window
    /// indicators (EMA/SMA/RSI/ATR/momentum) untouched.
    pub fn reset_session(&mut self) {
        self.vwap.reset();
        self.session_high = None;
        self.session_low = None;
        self.session_open = None;
        self.volume_history.clear();
    }

    pub fn is_warm(&self) -> bool {
        self.bars_seen >= WARM_UP_BARS
    }

    /// Average of the trailing volume history, or `None` before any bars
    /// have been observed.
    pub fn average_volume(&self) -> Option<f64> {
        if self.volume_history.is_empty() {
            return None;
        }
        let sum: f64 = self.volume_history.iter().map(|v| dec_f64(*v)).sum();
        Some(sum / self.volume_history.len() as f64)
    }

    fn track_session_extremes(&mut self, bar: &Bar) {
        self.session_high = Some(self.session_high.map_or(bar.high, |h| h.max(bar.high)));
        self.session_low = Some(self.session_low.map_or(bar.low, |l| l.min(bar.low)));
    }

    fn push_volume(&mut self, volume: Decimal) {
        self.volume_history.push_back(volume);
        if self.volume_history.len() > VOLUME_HISTORY_LEN {
            self.volume_history.pop_front();
        }
    }
}

impl Default for IndicatorSuite {
    fn default() -> Self {
        Self::new()
    }
}

fn dec_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(i: i64, close: Decimal) -> Bar {
        Bar {
            ts: Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap(),
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(1000),
        }
    }

    #[test]
    fn is_not_warm_before_50_bars() {
        let mut suite = IndicatorSuite::new();
        let bars: Vec<Bar> = (0..30).map(|i| bar(i, Decimal::from(4500 + i))).collect();
        suite.warm_up(&bars);
        assert!(!suite.is_warm());
    }

    #[test]
    fn is_warm_after_50_bars() {
        let mut suite = IndicatorSuite::new();
        let bars: Vec<Bar> = (0..50).map(|i| bar(i, Decimal::from(4500 + i))).collect();
        suite.warm_up(&bars);
        assert!(suite.is_warm());
        assert!(suite.ema9.value().is_some());
        assert!(suite.sma50.value().is_some());
        assert!(suite.vwap.value().is_some());
    }

    #[test]
    fn session_reset_clears_vwap_and_extremes_only() {
        let mut suite = IndicatorSuite::new();
        let bars: Vec<Bar> = (0..50).map(|i| bar(i, Decimal::from(4500 + i))).collect();
        suite.warm_up(&bars);
        let ema_before = suite.ema9.value();

        suite.reset_session();

        assert_eq!(suite.vwap.value(), None);
        assert_eq!(suite.session_high, None);
        assert_eq!(suite.ema9.value(), ema_before);
    }
}
