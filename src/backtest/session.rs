// =============================================================================
// Trading-session windows — RTH_US / ETH / FULL_24x5 / CUSTOM
// =============================================================================
//
// Session membership is always evaluated in US Eastern wall-clock time
// (`chrono-tz`), independent of the bar's stored UTC timestamp, since the
// instruments this platform trades are all US futures contracts on a single
// exchange calendar.
// =============================================================================

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::US::Eastern;

use crate::types::SessionMode;

#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub wraps_midnight: bool,
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid static time")
}

pub fn rth_us() -> SessionWindow {
    SessionWindow { start: time(9, 30), end: time(16, 15), wraps_midnight: false }
}

/// §4.2 step 7: TRIALS/PAPER widen the RTH window to preserve indicator
/// warmup while still generating calibration trades earlier/later in the day.
pub fn rth_us_widened() -> SessionWindow {
    SessionWindow { start: time(9, 35), end: time(15, 55), wraps_midnight: false }
}

pub fn eth() -> SessionWindow {
    SessionWindow { start: time(18, 0), end: time(9, 30), wraps_midnight: true }
}

fn in_window(ts: DateTime<Utc>, window: SessionWindow) -> bool {
    let t = ts.with_timezone(&Eastern).time();
    if window.wraps_midnight {
        t >= window.start || t < window.end
    } else {
        t >= window.start && t < window.end
    }
}

/// Whether `ts` falls inside the active trading session for `mode`. `bypass`
/// (set when `mode == FULL_24x5`) always returns true and short-circuits
/// before `widened` is even consulted.
pub fn is_within_trading_session(ts: DateTime<Utc>, mode: SessionMode, bypass: bool, widened: bool) -> bool {
    if bypass {
        return true;
    }
    match mode {
        SessionMode::Full24x5 => true,
        SessionMode::Custom => true,
        SessionMode::RthUs => in_window(ts, if widened { rth_us_widened() } else { rth_us() }),
        SessionMode::Eth => in_window(ts, eth()),
    }
}

/// A bot's `sessionMode == FULL_24x5` both bypasses the window check above
/// and disables no-trade windows entirely, per §4.2 step 9.
pub fn session_bypass(mode: SessionMode) -> bool {
    matches!(mode, SessionMode::Full24x5)
}

/// The calendar date (US/Eastern) a bar belongs to, used to detect day
/// boundaries for the intraday indicator reset.
pub fn et_trading_day(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Eastern).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rth_session_excludes_premarket() {
        // 13:00 UTC = 08:00 ET in January (EST, UTC-5) — before the open.
        let ts = utc(2024, 1, 10, 13, 0);
        assert!(!is_within_trading_session(ts, SessionMode::RthUs, false, false));
    }

    #[test]
    fn rth_session_includes_midday() {
        // 17:00 UTC = 12:00 ET in January — well inside RTH.
        let ts = utc(2024, 1, 10, 17, 0);
        assert!(is_within_trading_session(ts, SessionMode::RthUs, false, false));
    }

    #[test]
    fn full_24x5_always_in_session() {
        let ts = utc(2024, 1, 10, 3, 0);
        assert!(is_within_trading_session(ts, SessionMode::Full24x5, session_bypass(SessionMode::Full24x5), false));
    }

    #[test]
    fn eth_window_wraps_midnight() {
        // 23:00 ET is inside ETH (18:00-09:30 wrap).
        let ts = utc(2024, 1, 10, 4, 0); // 23:00 ET previous day (EST, UTC-5)
        assert!(is_within_trading_session(ts, SessionMode::Eth, false, false));
    }
}
