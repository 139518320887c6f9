// =============================================================================
// Bar validation — §4.2 step 4
// =============================================================================
//
// Checked one bar at a time against the instrument's own rules: OHLC
// internal consistency, tick alignment, price bounds, and continuity against
// the previous bar's timestamp. Aggregates up to three error strings — the
// caller fails the whole session with `BAR_VALIDATION_FAILED` the moment
// this returns anything non-empty.
// =============================================================================

use rust_decimal::Decimal;

use crate::bar_cache::Bar;
use crate::instruments::InstrumentSpec;

const MAX_ERRORS: usize = 3;

pub fn validate_bars(bars: &[Bar], spec: &InstrumentSpec, timeframe_seconds: i64) -> Vec<String> {
    let mut errors = Vec::new();
    let mut prev_ts = None;

    for bar in bars {
        if errors.len() >= MAX_ERRORS {
            break;
        }

        if !ohlc_is_consistent(bar) {
            errors.push(format!("OHLC inconsistency at {}", bar.ts));
            continue;
        }
        if !is_tick_aligned(bar, spec.tick_size) {
            errors.push(format!("tick misalignment at {}", bar.ts));
            continue;
        }
        if bar.low < spec.min_price || bar.high > spec.max_price {
            errors.push(format!("price out of bounds at {}", bar.ts));
            continue;
        }
        if let Some(prev) = prev_ts {
            if let Some(msg) = continuity_violation(prev, bar.ts, timeframe_seconds) {
                errors.push(msg);
                continue;
            }
        }
        prev_ts = Some(bar.ts);
    }

    errors
}

fn ohlc_is_consistent(bar: &Bar) -> bool {
    bar.low <= bar.high
        && bar.low <= bar.open
        && bar.low <= bar.close
        && bar.high >= bar.open
        && bar.high >= bar.close
}

fn is_tick_aligned(bar: &Bar, tick_size: Decimal) -> bool {
    if tick_size.is_zero() {
        return true;
    }
    [bar.open, bar.high, bar.low, bar.close]
        .iter()
        .all(|p| (p / tick_size).round() == p / tick_size)
}

/// Bars must be strictly increasing in time; gaps larger than one step are
/// expected (session/weekend breaks) and not flagged, only non-monotonic or
/// duplicate timestamps are.
fn continuity_violation(prev: chrono::DateTime<chrono::Utc>, current: chrono::DateTime<chrono::Utc>, _step_secs: i64) -> Option<String> {
    if current <= prev {
        Some(format!("non-monotonic timestamp at {current}"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar { ts: Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap(), open, high, low, close, volume: dec!(1000) }
    }

    #[test]
    fn clean_bars_produce_no_errors() {
        let spec = instruments::lookup("MES").unwrap();
        let bars = vec![
            bar(0, dec!(4500.00), dec!(4501.00), dec!(4499.00), dec!(4500.50)),
            bar(1, dec!(4500.50), dec!(4502.00), dec!(4500.00), dec!(4501.00)),
        ];
        assert!(validate_bars(&bars, spec, 300).is_empty());
    }

    #[test]
    fn inconsistent_ohlc_is_flagged() {
        let spec = instruments::lookup("MES").unwrap();
        // high below open/close is internally inconsistent.
        let bars = vec![bar(0, dec!(4500.00), dec!(4499.00), dec!(4499.00), dec!(4500.50))];
        assert_eq!(validate_bars(&bars, spec, 300).len(), 1);
    }

    #[test]
    fn off_tick_price_is_flagged() {
        let spec = instruments::lookup("MES").unwrap();
        let bars = vec![bar(0, dec!(4500.01), dec!(4501.01), dec!(4499.01), dec!(4500.51))];
        assert_eq!(validate_bars(&bars, spec, 300).len(), 1);
    }

    #[test]
    fn out_of_range_price_is_flagged() {
        let spec = instruments::lookup("MES").unwrap();
        let bars = vec![bar(0, dec!(1.00), dec!(2.00), dec!(1.00), dec!(1.50))];
        assert_eq!(validate_bars(&bars, spec, 300).len(), 1);
    }

    #[test]
    fn non_monotonic_timestamp_is_flagged() {
        let spec = instruments::lookup("MES").unwrap();
        let mut bars = vec![
            bar(1, dec!(4500.00), dec!(4501.00), dec!(4499.00), dec!(4500.50)),
            bar(0, dec!(4500.00), dec!(4501.00), dec!(4499.00), dec!(4500.50)),
        ];
        bars.sort_by_key(|_| 0); // keep original (non-monotonic) order
        assert_eq!(validate_bars(&bars, spec, 300).len(), 1);
    }

    #[test]
    fn caps_at_three_errors() {
        let spec = instruments::lookup("MES").unwrap();
        let bars: Vec<Bar> = (0..10).map(|_| bar(0, dec!(1.00), dec!(0.50), dec!(1.00), dec!(1.00))).collect();
        assert_eq!(validate_bars(&bars, spec, 300).len(), 3);
    }
}
