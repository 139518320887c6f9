// =============================================================================
// Entry condition predicates — one per canonical EntryConditionType
// =============================================================================
//
// Each predicate reads the current bar, a short rolling window of recent
// bars, and the live `IndicatorSuite`, returning whether its archetype's
// signal fires on this bar. Every predicate has a TRIALS-relaxed variant
// (wider bands / lower thresholds) selected by `ExecutionProfile`, so the
// calibration stage can generate baseline trades without the production
// thresholds starving it of signal — see `backtest::profile`.
// =============================================================================

use rust_decimal::Decimal;

use crate::bar_cache::Bar;
use crate::backtest::profile::ExecutionProfile;
use crate::indicators::IndicatorSuite;
use crate::types::EntryConditionType;

use super::rules::EntryPredicateConfig;

/// Everything an entry predicate needs beyond the live indicator suite: the
/// bar being evaluated, a trailing window ending at (and including) it, and
/// the prior session's open (for gap-based archetypes).
pub struct EntryContext<'a> {
    pub bar: &'a Bar,
    pub window: &'a [Bar],
    pub indicators: &'a IndicatorSuite,
    pub prior_session_open: Option<Decimal>,
}

fn dec_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

fn threshold(cfg: &EntryPredicateConfig, key: &str, default: f64) -> f64 {
    *cfg.thresholds.get(key).unwrap_or(&default)
}

pub fn evaluate(
    entry: EntryConditionType,
    ctx: &EntryContext,
    cfg: &EntryPredicateConfig,
    profile: &ExecutionProfile,
) -> bool {
    match entry {
        EntryConditionType::Breakout => breakout(ctx, cfg, profile),
        EntryConditionType::MeanReversion => mean_reversion(ctx, cfg, profile),
        EntryConditionType::VwapTouch => vwap_touch(ctx, cfg, profile),
        EntryConditionType::TrendContinuation => trend_continuation(ctx, cfg, profile),
        EntryConditionType::GapFade => gap_fade(ctx, cfg, profile),
        EntryConditionType::GapFill => gap_fill(ctx, cfg, profile),
        EntryConditionType::Reversal => reversal(ctx, cfg, profile),
        EntryConditionType::RangeScalp => range_scalp(ctx, cfg, profile),
        EntryConditionType::MomentumSurge => momentum_surge(ctx, cfg, profile),
    }
}

fn breakout(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let range_bars = threshold(cfg, "range_bars", 20.0) as usize;
    let mut breakout_ticks = threshold(cfg, "breakout_ticks", 4.0);
    if profile.trials_relaxed {
        breakout_ticks *= 0.5;
    }
    if ctx.window.len() < range_bars + 1 {
        return false;
    }
    let lookback = &ctx.window[ctx.window.len() - range_bars - 1..ctx.window.len() - 1];
    let range_high = lookback.iter().map(|b| b.high).max().unwrap_or(ctx.bar.close);
    let close = ctx.bar.close;
    let tick = Decimal::new(1, 2); // conservative default when caller has no instrument spec in-hand
    dec_f64(close) > dec_f64(range_high) + breakout_ticks * dec_f64(tick)
}

fn mean_reversion(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let mut oversold = threshold(cfg, "rsi_oversold", 30.0);
    let mut overbought = threshold(cfg, "rsi_overbought", 70.0);
    let mut deviation_mult = threshold(cfg, "deviation_atr_mult", 2.0);
    if profile.trials_relaxed {
        oversold += 5.0;
        overbought -= 5.0;
        deviation_mult *= 0.7;
    }
    let Some(rsi) = ctx.indicators.rsi14.value() else { return false };
    let Some(vwap) = ctx.indicators.vwap.value() else { return false };
    let Some(atr) = ctx.indicators.atr14.value() else { return false };
    if atr <= 0.0 {
        return false;
    }
    let close = dec_f64(ctx.bar.close);
    let deviation = (close - vwap).abs() / atr;
    (rsi <= oversold || rsi >= overbought) && deviation > deviation_mult
}

fn vwap_touch(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let mut band_ticks = threshold(cfg, "band_ticks", 2.0);
    if profile.trials_relaxed {
        band_ticks *= 2.0;
    }
    let Some(vwap) = ctx.indicators.vwap.value() else { return false };
    let close = dec_f64(ctx.bar.close);
    let tick = 0.01;
    (close - vwap).abs() <= band_ticks * tick * 25.0
}

fn trend_continuation(ctx: &EntryContext, _cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let Some(fast) = ctx.indicators.ema9.value() else { return false };
    let Some(slow) = ctx.indicators.ema21.value() else { return false };
    let close = dec_f64(ctx.bar.close);
    let side_agrees = if fast > slow { close > fast } else { close < fast };
    if !side_agrees {
        return false;
    }
    if profile.trials_relaxed {
        return true;
    }
    match ctx.indicators.momentum10.value() {
        Some(m) => (fast > slow) == (m > 0.0),
        None => false,
    }
}

fn gap_fade(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    gap_based(ctx, cfg, profile)
}

fn gap_fill(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    gap_based(ctx, cfg, profile)
}

fn gap_based(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let mut gap_atr_mult = threshold(cfg, "gap_atr_mult", 0.5);
    if profile.trials_relaxed {
        gap_atr_mult *= 0.6;
    }
    let Some(prior_open) = ctx.prior_session_open else { return false };
    let Some(atr) = ctx.indicators.atr14.value() else { return false };
    if atr <= 0.0 {
        return false;
    }
    let gap = (dec_f64(ctx.bar.open) - dec_f64(prior_open)).abs();
    gap / atr > gap_atr_mult
}

fn reversal(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let mut rsi_extreme = threshold(cfg, "rsi_extreme", 80.0);
    let lookback = threshold(cfg, "lookback_bars", 10.0) as usize;
    if profile.trials_relaxed {
        rsi_extreme -= 10.0;
    }
    let Some(rsi) = ctx.indicators.rsi14.value() else { return false };
    if ctx.window.len() < lookback {
        return false;
    }
    let window = &ctx.window[ctx.window.len() - lookback..];
    let local_high = window.iter().map(|b| b.high).max().unwrap_or(ctx.bar.high);
    let local_low = window.iter().map(|b| b.low).min().unwrap_or(ctx.bar.low);
    let at_extreme = ctx.bar.high >= local_high || ctx.bar.low <= local_low;
    let rsi_confirms = rsi >= rsi_extreme || rsi <= (100.0 - rsi_extreme);
    if !(at_extreme && rsi_confirms) {
        return false;
    }
    if profile.trials_relaxed {
        return true;
    }
    // non-TRIALS: require the candle to close back against the extreme it made.
    if ctx.bar.high >= local_high {
        ctx.bar.close < ctx.bar.open
    } else {
        ctx.bar.close > ctx.bar.open
    }
}

fn range_scalp(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let range_bars = threshold(cfg, "range_bars", 14.0) as usize;
    let mut band_fraction = threshold(cfg, "band_fraction", 0.15);
    if profile.trials_relaxed {
        band_fraction *= 1.5;
    }
    if ctx.window.len() < range_bars {
        return false;
    }
    let window = &ctx.window[ctx.window.len() - range_bars..];
    let high = window.iter().map(|b| b.high).max().unwrap_or(ctx.bar.high);
    let low = window.iter().map(|b| b.low).min().unwrap_or(ctx.bar.low);
    let span = dec_f64(high) - dec_f64(low);
    if span <= 0.0 {
        return false;
    }
    let close = dec_f64(ctx.bar.close);
    let position = (close - dec_f64(low)) / span;
    position <= band_fraction || position >= 1.0 - band_fraction
}

fn momentum_surge(ctx: &EntryContext, cfg: &EntryPredicateConfig, profile: &ExecutionProfile) -> bool {
    let mut momentum_threshold = threshold(cfg, "momentum_threshold", 3.0);
    let mut volume_multiple = threshold(cfg, "volume_multiple", 1.5);
    if profile.trials_relaxed {
        momentum_threshold *= 0.5;
        volume_multiple *= 0.7;
    }
    let Some(fast) = ctx.indicators.ema9.value() else { return false };
    let Some(slow) = ctx.indicators.ema20.value() else { return false };
    let Some(momentum) = ctx.indicators.momentum10.value() else { return false };
    let aligned = (fast > slow && momentum > 0.0) || (fast < slow && momentum < 0.0);
    if !aligned || momentum.abs() < momentum_threshold {
        return false;
    }
    let Some(avg_volume) = ctx.indicators.average_volume() else { return false };
    if avg_volume <= 0.0 {
        return false;
    }
    dec_f64(ctx.bar.volume) >= avg_volume * volume_multiple
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn bar(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Bar {
        Bar { ts: Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap(), open, high, low, close, volume }
    }

    fn profile(relaxed: bool) -> ExecutionProfile {
        ExecutionProfile::new(relaxed, false, crate::types::SessionMode::RthUs)
    }

    fn cfg(pairs: &[(&str, f64)]) -> EntryPredicateConfig {
        let mut thresholds = HashMap::new();
        for (k, v) in pairs {
            thresholds.insert(k.to_string(), *v);
        }
        EntryPredicateConfig { thresholds }
    }

    #[test]
    fn breakout_fires_above_range_high_by_threshold_ticks() {
        let mut window: Vec<Bar> = (0..21)
            .map(|i| bar(i, dec!(100), dec!(101), dec!(99), dec!(100), dec!(1000)))
            .collect();
        let last = bar(21, dec!(101), dec!(101.10), dec!(100), dec!(101.10), dec!(1000));
        window.push(last.clone());

        let ctx = EntryContext { bar: &last, window: &window, indicators: &IndicatorSuite::new(), prior_session_open: None };
        let c = cfg(&[("range_bars", 20.0), ("breakout_ticks", 4.0)]);
        assert!(breakout(&ctx, &c, &profile(false)));
    }

    #[test]
    fn gap_based_requires_prior_session_open() {
        let bars: Vec<Bar> = vec![bar(0, dec!(100), dec!(101), dec!(99), dec!(100), dec!(1000))];
        let ctx = EntryContext { bar: &bars[0], window: &bars, indicators: &IndicatorSuite::new(), prior_session_open: None };
        let c = cfg(&[("gap_atr_mult", 0.5)]);
        assert!(!gap_fade(&ctx, &c, &profile(false)));
    }

    #[test]
    fn range_scalp_fires_near_band_edges() {
        let window: Vec<Bar> = (0..14)
            .map(|i| bar(i, dec!(100), dec!(105), dec!(95), dec!(100), dec!(1000)))
            .collect();
        let last = window.last().unwrap().clone();
        let low_close = Bar { close: dec!(95.5), ..last.clone() };
        let ctx = EntryContext { bar: &low_close, window: &window, indicators: &IndicatorSuite::new(), prior_session_open: None };
        let c = cfg(&[("range_bars", 14.0), ("band_fraction", 0.15)]);
        assert!(range_scalp(&ctx, &c, &profile(false)));
    }

    #[test]
    fn relaxed_profile_widens_momentum_surge_thresholds() {
        let mut suite = IndicatorSuite::new();
        let bars: Vec<Bar> = (0..60)
            .map(|i| bar(i, Decimal::from(4500 + i), Decimal::from(4501 + i), Decimal::from(4499 + i), Decimal::from(4500 + i), dec!(1000)))
            .collect();
        suite.warm_up(&bars[..50]);
        for b in &bars[50..] {
            suite.on_bar(b);
        }
        let last = bars.last().unwrap();
        let ctx = EntryContext { bar: last, window: &bars, indicators: &suite, prior_session_open: None };
        let c = cfg(&[("momentum_threshold", 3.0), ("volume_multiple", 1.5)]);
        // Production thresholds may reject a modest drift; relaxed must be at least as permissive.
        let prod = momentum_surge(&ctx, &c, &profile(false));
        let relaxed = momentum_surge(&ctx, &c, &profile(true));
        assert!(relaxed || !prod);
    }
}
