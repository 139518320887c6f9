// =============================================================================
// Regime Detection — micro + macro classification, §4.6
// =============================================================================
//
// Generalizes the teacher's single-symbol `RegimeDetector` (ADX/BBW/Hurst/
// entropy over intraday candles) to the platform-wide classification this
// spec calls for: a micro regime computed from 30 days of daily bars
// (volatility, average return, trend strength, price range, volume profile),
// combined with an optional macro regime into a unified 9-value label that
// drives a static archetype/multiplier matrix. Same cached-state-behind-a-
// lock shape as the teacher's detector; same priority-ordered classification
// style as its `classify()`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bar_cache::Bar;

const LOOKBACK_DAYS: usize = 30;
const CACHE_TTL: Duration = Duration::minutes(5);
const BURST_RESEARCH_COOLDOWN: Duration = Duration::hours(4);

/// §4.6: the five micro-regime labels derived purely from this symbol's own
/// daily bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MicroRegime {
    Bull,
    Bear,
    Sideways,
    HighVolatility,
    LowVolatility,
    Unknown,
}

/// Optional broader-market context; supplied by the caller (cross-symbol or
/// index-level regime is outside this core's scope to compute itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroRegime {
    Bull,
    Bear,
    Neutral,
}

/// The combined, 9-value label the rest of the platform (position sizing,
/// evolution's `regime_aware` mutation) actually keys off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnifiedRegime {
    BullExpansion,
    BullContraction,
    BearExpansion,
    BearRecession,
    SidewaysStable,
    HighVolCrisis,
    LowVolCompression,
    Transition,
    Unknown,
}

impl std::fmt::Display for UnifiedRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BullExpansion => "BULL_EXPANSION",
            Self::BullContraction => "BULL_CONTRACTION",
            Self::BearExpansion => "BEAR_EXPANSION",
            Self::BearRecession => "BEAR_RECESSION",
            Self::SidewaysStable => "SIDEWAYS_STABLE",
            Self::HighVolCrisis => "HIGH_VOL_CRISIS",
            Self::LowVolCompression => "LOW_VOL_COMPRESSION",
            Self::Transition => "TRANSITION",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeMetrics {
    pub volatility: f64,
    pub average_return: f64,
    pub trend_strength: f64,
    pub price_range_pct: f64,
    pub volume_profile: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub symbol: String,
    pub micro: MicroRegime,
    pub macro_regime: Option<MacroRegime>,
    pub unified: UnifiedRegime,
    pub metrics: RegimeMetrics,
    pub computed_at: DateTime<Utc>,
}

/// Per-unified-regime guidance: which archetypes fit, and the position/stop/
/// target multipliers a strategy executor should apply on top of its own
/// defaults.
#[derive(Debug, Clone)]
pub struct RegimePlaybook {
    pub optimal_archetypes: &'static [&'static str],
    pub acceptable_archetypes: &'static [&'static str],
    pub avoid_archetypes: &'static [&'static str],
    pub position_multiplier: f64,
    pub stop_loss_multiplier: f64,
    pub take_profit_multiplier: f64,
}

pub fn playbook(regime: UnifiedRegime) -> RegimePlaybook {
    match regime {
        UnifiedRegime::BullExpansion => RegimePlaybook {
            optimal_archetypes: &["trend_continuation", "momentum_surge", "breakout"],
            acceptable_archetypes: &["vwap_touch"],
            avoid_archetypes: &["mean_reversion", "range_scalp"],
            position_multiplier: 1.25,
            stop_loss_multiplier: 1.0,
            take_profit_multiplier: 1.5,
        },
        UnifiedRegime::BullContraction => RegimePlaybook {
            optimal_archetypes: &["vwap_touch", "gap_fill"],
            acceptable_archetypes: &["trend_continuation"],
            avoid_archetypes: &["momentum_surge"],
            position_multiplier: 0.85,
            stop_loss_multiplier: 0.9,
            take_profit_multiplier: 1.0,
        },
        UnifiedRegime::BearExpansion => RegimePlaybook {
            optimal_archetypes: &["momentum_surge", "breakout", "reversal"],
            acceptable_archetypes: &["gap_fade"],
            avoid_archetypes: &["mean_reversion", "range_scalp"],
            position_multiplier: 1.0,
            stop_loss_multiplier: 1.1,
            take_profit_multiplier: 1.3,
        },
        UnifiedRegime::BearRecession => RegimePlaybook {
            optimal_archetypes: &["gap_fade", "reversal"],
            acceptable_archetypes: &["vwap_touch"],
            avoid_archetypes: &["trend_continuation", "breakout"],
            position_multiplier: 0.6,
            stop_loss_multiplier: 1.2,
            take_profit_multiplier: 0.9,
        },
        UnifiedRegime::SidewaysStable => RegimePlaybook {
            optimal_archetypes: &["range_scalp", "mean_reversion", "vwap_touch"],
            acceptable_archetypes: &["gap_fade", "gap_fill"],
            avoid_archetypes: &["trend_continuation", "momentum_surge"],
            position_multiplier: 1.0,
            stop_loss_multiplier: 0.8,
            take_profit_multiplier: 0.8,
        },
        UnifiedRegime::HighVolCrisis => RegimePlaybook {
            optimal_archetypes: &["reversal"],
            acceptable_archetypes: &["gap_fade"],
            avoid_archetypes: &["breakout", "momentum_surge", "trend_continuation", "range_scalp"],
            position_multiplier: 0.3,
            stop_loss_multiplier: 1.5,
            take_profit_multiplier: 1.2,
        },
        UnifiedRegime::LowVolCompression => RegimePlaybook {
            optimal_archetypes: &["breakout", "range_scalp"],
            acceptable_archetypes: &["vwap_touch", "mean_reversion"],
            avoid_archetypes: &["momentum_surge"],
            position_multiplier: 0.7,
            stop_loss_multiplier: 0.7,
            take_profit_multiplier: 1.0,
        },
        UnifiedRegime::Transition | UnifiedRegime::Unknown => RegimePlaybook {
            optimal_archetypes: &[],
            acceptable_archetypes: &["vwap_touch", "mean_reversion"],
            avoid_archetypes: &["momentum_surge", "breakout"],
            position_multiplier: 0.5,
            stop_loss_multiplier: 1.0,
            take_profit_multiplier: 1.0,
        },
    }
}

/// Micro classification from raw daily-bar metrics. Priority-ordered, first
/// match wins, same style as the teacher's `classify()`.
fn classify_micro(metrics: &RegimeMetrics) -> MicroRegime {
    if metrics.volatility >= 0.035 {
        return MicroRegime::HighVolatility;
    }
    if metrics.volatility <= 0.006 {
        return MicroRegime::LowVolatility;
    }
    if metrics.average_return > 0.0008 && metrics.trend_strength > 0.3 {
        return MicroRegime::Bull;
    }
    if metrics.average_return < -0.0008 && metrics.trend_strength > 0.3 {
        return MicroRegime::Bear;
    }
    if metrics.trend_strength <= 0.3 {
        return MicroRegime::Sideways;
    }
    MicroRegime::Unknown
}

fn combine(micro: MicroRegime, macro_regime: Option<MacroRegime>) -> UnifiedRegime {
    use MacroRegime as Mr;
    use MicroRegime as Mi;

    match (micro, macro_regime) {
        (Mi::HighVolatility, _) => UnifiedRegime::HighVolCrisis,
        (Mi::LowVolatility, _) => UnifiedRegime::LowVolCompression,
        (Mi::Bull, Some(Mr::Bull) | None) => UnifiedRegime::BullExpansion,
        (Mi::Bull, Some(Mr::Neutral)) => UnifiedRegime::BullContraction,
        (Mi::Bull, Some(Mr::Bear)) => UnifiedRegime::Transition,
        (Mi::Bear, Some(Mr::Bear) | None) => UnifiedRegime::BearExpansion,
        (Mi::Bear, Some(Mr::Neutral)) => UnifiedRegime::BearRecession,
        (Mi::Bear, Some(Mr::Bull)) => UnifiedRegime::Transition,
        (Mi::Sideways, _) => UnifiedRegime::SidewaysStable,
        (Mi::Unknown, _) => UnifiedRegime::Unknown,
    }
}

fn compute_metrics(bars: &[Bar]) -> RegimeMetrics {
    let closes: Vec<f64> = bars.iter().map(|b| b.close.to_string().parse().unwrap_or(0.0)).collect();
    if closes.len() < 2 {
        return RegimeMetrics { volatility: 0.0, average_return: 0.0, trend_strength: 0.0, price_range_pct: 0.0, volume_profile: 0.0 };
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    let average_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - average_return).powi(2)).sum::<f64>() / returns.len() as f64;
    let volatility = variance.sqrt();

    let ma_short = closes[closes.len().saturating_sub(5)..].iter().sum::<f64>() / closes.len().min(5) as f64;
    let ma_long = closes.iter().sum::<f64>() / closes.len() as f64;
    let directional_bias = if average_return >= 0.0 { 1.0 } else { -1.0 };
    let trend_strength = (((ma_short - ma_long) / ma_long).abs() * directional_bias.signum()).abs().min(1.0);

    let high = bars.iter().map(|b| b.high.to_string().parse().unwrap_or(0.0)).fold(f64::MIN, f64::max);
    let low = bars.iter().map(|b| b.low.to_string().parse().unwrap_or(0.0)).fold(f64::MAX, f64::min);
    let last_close = *closes.last().unwrap_or(&1.0);
    let price_range_pct = if last_close.abs() > f64::EPSILON { (high - low) / last_close } else { 0.0 };

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume.to_string().parse().unwrap_or(0.0)).collect();
    let avg_volume = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let recent_volume = volumes[volumes.len().saturating_sub(5)..].iter().sum::<f64>() / volumes.len().min(5) as f64;
    let volume_profile = if avg_volume > 0.0 { recent_volume / avg_volume } else { 1.0 };

    RegimeMetrics { volatility, average_return, trend_strength, price_range_pct, volume_profile }
}

struct CachedEntry {
    snapshot: RegimeSnapshot,
    cached_at: DateTime<Utc>,
}

/// Per-symbol regime cache plus the burst-research cooldown gate. One
/// process-wide singleton mutated only by whoever owns the regime-refresh
/// worker, matching §5's ownership discipline for process-wide state.
pub struct RegimeCache {
    entries: RwLock<HashMap<String, CachedEntry>>,
    last_burst_research: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl RegimeCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entries: RwLock::new(HashMap::new()), last_burst_research: RwLock::new(HashMap::new()) })
    }

    /// Return the cached snapshot for `symbol` if still within the 5-minute
    /// TTL, else `None` (caller should recompute via `refresh`).
    pub fn get(&self, symbol: &str) -> Option<RegimeSnapshot> {
        let entries = self.entries.read();
        let entry = entries.get(symbol)?;
        if Utc::now().signed_duration_since(entry.cached_at) < CACHE_TTL {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    /// Recompute and cache the regime for `symbol` from up to the last
    /// [`LOOKBACK_DAYS`] daily bars.
    pub fn refresh(&self, symbol: &str, daily_bars: &[Bar], macro_regime: Option<MacroRegime>) -> RegimeSnapshot {
        let window_start = daily_bars.len().saturating_sub(LOOKBACK_DAYS);
        let window = &daily_bars[window_start..];

        let metrics = compute_metrics(window);
        let micro = classify_micro(&metrics);
        let unified = combine(micro, macro_regime);

        let snapshot = RegimeSnapshot { symbol: symbol.to_string(), micro, macro_regime, unified, metrics, computed_at: Utc::now() };

        self.entries.write().insert(symbol.to_string(), CachedEntry { snapshot: snapshot.clone(), cached_at: snapshot.computed_at });
        debug!(symbol, unified = %unified, "regime cache refreshed");
        snapshot
    }

    /// §4.6: a full research burst (e.g. an LLM/AI-assisted regime deep dive)
    /// is rate-limited per symbol to once per 4 hours, independent of the
    /// 5-minute cache TTL governing ordinary refreshes.
    pub fn try_start_burst_research(&self, symbol: &str) -> bool {
        let mut last = self.last_burst_research.write();
        let now = Utc::now();
        let allowed = match last.get(symbol) {
            Some(prev) => now.signed_duration_since(*prev) >= BURST_RESEARCH_COOLDOWN,
            None => true,
        };
        if allowed {
            last.insert(symbol.to_string(), now);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(close: f64, volume: f64) -> Bar {
        Bar { ts: Utc::now(), open: dec!(1), high: rust_decimal::Decimal::try_from(close * 1.01).unwrap(), low: rust_decimal::Decimal::try_from(close * 0.99).unwrap(), close: rust_decimal::Decimal::try_from(close).unwrap(), volume: rust_decimal::Decimal::try_from(volume).unwrap() }
    }

    #[test]
    fn steady_uptrend_classifies_bull() {
        let bars: Vec<Bar> = (0..30).map(|i| bar(100.0 + i as f64 * 2.0, 1000.0)).collect();
        let metrics = compute_metrics(&bars);
        assert_eq!(classify_micro(&metrics), MicroRegime::Bull);
    }

    #[test]
    fn flat_prices_classify_sideways() {
        let bars: Vec<Bar> = (0..30).map(|_| bar(100.0, 1000.0)).collect();
        let metrics = compute_metrics(&bars);
        assert_eq!(classify_micro(&metrics), MicroRegime::Sideways);
    }

    #[test]
    fn wild_swings_classify_high_volatility() {
        let bars: Vec<Bar> = (0..30).map(|i| bar(if i % 2 == 0 { 80.0 } else { 130.0 }, 1000.0)).collect();
        let metrics = compute_metrics(&bars);
        assert_eq!(classify_micro(&metrics), MicroRegime::HighVolatility);
    }

    #[test]
    fn bull_micro_with_bear_macro_is_transition() {
        assert_eq!(combine(MicroRegime::Bull, Some(MacroRegime::Bear)), UnifiedRegime::Transition);
    }

    #[test]
    fn cache_respects_ttl() {
        let cache = RegimeCache::new();
        let bars: Vec<Bar> = (0..30).map(|i| bar(100.0 + i as f64, 1000.0)).collect();
        cache.refresh("MES", &bars, None);
        assert!(cache.get("MES").is_some());
        assert!(cache.get("UNKNOWN_SYMBOL").is_none());
    }

    #[test]
    fn burst_research_cooldown_blocks_second_call() {
        let cache = RegimeCache::new();
        assert!(cache.try_start_burst_research("MES"));
        assert!(!cache.try_start_burst_research("MES"));
    }
}
