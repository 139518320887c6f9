// =============================================================================
// Fixed-precision money arithmetic
// =============================================================================
//
// All trade P&L uses `rust_decimal::Decimal` (28-29 significant digits,
// comfortably above the 20-digit floor in §4.2) instead of binary floating
// point, per the Design Notes. Rounding is half-up, chosen once here and
// never revisited — `round_half_up` is the only rounding primitive the
// backtest executor calls.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// Round `value` to `decimal_places` using half-up rounding (ties away from
/// zero is what `rust_decimal` calls `MidpointAwayFromZero`, which matches
/// decimal.js's default `ROUND_HALF_UP` for the non-negative values money
/// arithmetic in this crate always deals in).
pub fn round_half_up(value: Decimal, decimal_places: u32) -> Decimal {
    value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a raw price to the instrument's tick size, half-up.
pub fn round_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    let ticks = round_half_up(price / tick_size, 0);
    ticks * tick_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn half_up_rounds_away_from_zero_on_tie() {
        assert_eq!(round_half_up(dec!(1.005), 2), dec!(1.01));
        assert_eq!(round_half_up(dec!(1.004), 2), dec!(1.00));
    }

    #[test]
    fn tick_rounding_snaps_to_nearest_tick() {
        let tick = dec!(0.25);
        assert_eq!(round_to_tick(dec!(5000.10), tick), dec!(5000.00));
        assert_eq!(round_to_tick(dec!(5000.13), tick), dec!(5000.25));
    }

    #[test]
    fn zero_tick_size_is_identity() {
        assert_eq!(round_to_tick(dec!(42.123), dec!(0)), dec!(42.123));
    }
}
