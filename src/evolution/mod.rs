// =============================================================================
// Strategy Evolution — parameter mutation driven by performance + regime, §4.6
// =============================================================================
//
// Each archetype carries a fixed parameter space; a generation's
// `strategy_config` is mutated into the next generation's according to one of
// four mutation strategies, optionally crossed over with a second parent.
// Determinism comes from the same `Mulberry32` PRNG the backtest executor
// seeds per session (`rng.rs`), so a re-run with the same bot/session ids
// reproduces the same mutated config.
// =============================================================================

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::PerformanceSnapshot;
use crate::regime::UnifiedRegime;
use crate::rng::Mulberry32;

/// One tunable parameter in an archetype's fixed parameter space.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub mutation_weight: f64,
}

#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    Integer { min: i64, max: i64, default: i64 },
    Float { min: f64, max: f64, default: f64 },
    Boolean { default: bool },
    Enum { values: &'static [&'static str], default_index: usize },
}

/// Fixed parameter space for each strategy archetype. A small, representative
/// set per family rather than an exhaustive tuning surface — archetypes not
/// listed here fall back to `generic_param_space`.
pub fn param_space(archetype_id: &str) -> Vec<ParamSpec> {
    match archetype_id {
        "breakout" => vec![
            ParamSpec { name: "lookback_bars", kind: ParamKind::Integer { min: 5, max: 60, default: 20 }, mutation_weight: 0.3 },
            ParamSpec { name: "breakout_atr_mult", kind: ParamKind::Float { min: 0.5, max: 3.0, default: 1.5 }, mutation_weight: 0.4 },
            ParamSpec { name: "require_volume_confirm", kind: ParamKind::Boolean { default: true }, mutation_weight: 0.1 },
        ],
        "mean_reversion" => vec![
            ParamSpec { name: "zscore_entry", kind: ParamKind::Float { min: 1.0, max: 4.0, default: 2.0 }, mutation_weight: 0.4 },
            ParamSpec { name: "lookback_bars", kind: ParamKind::Integer { min: 10, max: 100, default: 30 }, mutation_weight: 0.3 },
        ],
        "vwap_touch" => vec![
            ParamSpec { name: "band_width_bp", kind: ParamKind::Float { min: 2.0, max: 50.0, default: 10.0 }, mutation_weight: 0.35 },
            ParamSpec { name: "session", kind: ParamKind::Enum { values: &["RTH", "ETH", "BOTH"], default_index: 0 }, mutation_weight: 0.1 },
        ],
        _ => generic_param_space(),
    }
}

fn generic_param_space() -> Vec<ParamSpec> {
    vec![
        ParamSpec { name: "entry_threshold", kind: ParamKind::Float { min: 0.1, max: 5.0, default: 1.0 }, mutation_weight: 0.4 },
        ParamSpec { name: "lookback_bars", kind: ParamKind::Integer { min: 5, max: 100, default: 20 }, mutation_weight: 0.3 },
        ParamSpec { name: "filter_enabled", kind: ParamKind::Boolean { default: false }, mutation_weight: 0.1 },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    Gaussian,
    Uniform,
    Boundary,
    Adaptive,
    RegimeAware,
}

/// Rate/strength the `regime_aware` mutation type overrides to, per §4.6.
fn regime_aware_rate_strength(regime: UnifiedRegime) -> (f64, f64) {
    match regime {
        UnifiedRegime::HighVolCrisis => (0.40, 0.50),
        UnifiedRegime::LowVolCompression => (0.05, 0.10),
        _ => (0.15, 0.25),
    }
}

fn param_default(kind: ParamKind) -> Value {
    match kind {
        ParamKind::Integer { default, .. } => Value::from(default),
        ParamKind::Float { default, .. } => Value::from(default),
        ParamKind::Boolean { default } => Value::from(default),
        ParamKind::Enum { values, default_index } => Value::from(values[default_index]),
    }
}

fn clamp_f64(v: f64, min: f64, max: f64) -> f64 {
    v.clamp(min, max)
}

/// Mutate one parameter's current value (falling back to its spec default if
/// absent or the wrong JSON type) according to `mutation_type`, `rate`
/// (probability this parameter mutates at all) and `strength` (how far).
fn mutate_param(spec: &ParamSpec, current: Option<&Value>, mutation_type: MutationType, rate: f64, strength: f64, rng: &mut Mulberry32) -> Value {
    if rng.next_f64() > rate * spec.mutation_weight.max(0.01) {
        return current.cloned().unwrap_or_else(|| param_default(spec.kind));
    }

    match spec.kind {
        ParamKind::Integer { min, max, default } => {
            let base = current.and_then(|v| v.as_i64()).unwrap_or(default);
            let span = (max - min) as f64;
            let delta = match mutation_type {
                MutationType::Gaussian | MutationType::Adaptive | MutationType::RegimeAware => rng.next_gaussian() * strength * span,
                MutationType::Uniform => rng.next_range(-strength * span, strength * span),
                MutationType::Boundary => {
                    if rng.next_f64() < 0.5 {
                        (min - base) as f64
                    } else {
                        (max - base) as f64
                    }
                }
            };
            Value::from((base as f64 + delta).round().clamp(min as f64, max as f64) as i64)
        }
        ParamKind::Float { min, max, default } => {
            let base = current.and_then(|v| v.as_f64()).unwrap_or(default);
            let span = max - min;
            let delta = match mutation_type {
                MutationType::Gaussian | MutationType::Adaptive | MutationType::RegimeAware => rng.next_gaussian() * strength * span,
                MutationType::Uniform => rng.next_range(-strength * span, strength * span),
                MutationType::Boundary => {
                    if rng.next_f64() < 0.5 {
                        min - base
                    } else {
                        max - base
                    }
                }
            };
            Value::from(clamp_f64(base + delta, min, max))
        }
        ParamKind::Boolean { default } => {
            let base = current.and_then(|v| v.as_bool()).unwrap_or(default);
            if rng.next_f64() < strength { Value::from(!base) } else { Value::from(base) }
        }
        ParamKind::Enum { values, default_index } => {
            let base = current.and_then(|v| v.as_str()).unwrap_or(values[default_index]);
            if matches!(mutation_type, MutationType::Boundary) || rng.next_f64() < strength {
                let idx = rng.next_range(0.0, values.len() as f64) as usize;
                Value::from(values[idx.min(values.len() - 1)])
            } else {
                Value::from(base)
            }
        }
    }
}

/// Adaptive strength decay: `strength * 0.95^(generation / 10)`.
pub fn adaptive_strength(base_strength: f64, generation: u32) -> f64 {
    base_strength * 0.95_f64.powf(generation as f64 / 10.0)
}

/// Produce the next generation's `strategy_config` by mutating `parent`'s
/// config in place, parameter by parameter, per the archetype's fixed space.
pub fn mutate_generation(
    archetype_id: &str,
    parent_config: &HashMap<String, Value>,
    generation_number: u32,
    mutation_type: MutationType,
    base_rate: f64,
    base_strength: f64,
    regime: Option<UnifiedRegime>,
    rng: &mut Mulberry32,
) -> HashMap<String, Value> {
    let (rate, strength) = match mutation_type {
        MutationType::Adaptive => (base_rate, adaptive_strength(base_strength, generation_number)),
        MutationType::RegimeAware => {
            regime.map(regime_aware_rate_strength).unwrap_or((base_rate, base_strength))
        }
        _ => (base_rate, base_strength),
    };

    param_space(archetype_id)
        .into_iter()
        .map(|spec| {
            let current = parent_config.get(spec.name);
            let mutated = mutate_param(&spec, current, mutation_type, rate, strength, rng);
            (spec.name.to_string(), mutated)
        })
        .collect()
}

/// Crossover two parent configs per-parameter: 50/50 choice of which parent
/// contributes, with a 30% chance of a weighted average instead for float
/// parameters specifically.
pub fn crossover(archetype_id: &str, parent_a: &HashMap<String, Value>, parent_b: &HashMap<String, Value>, rng: &mut Mulberry32) -> HashMap<String, Value> {
    param_space(archetype_id)
        .into_iter()
        .map(|spec| {
            let a = parent_a.get(spec.name).cloned().unwrap_or_else(|| param_default(spec.kind));
            let b = parent_b.get(spec.name).cloned().unwrap_or_else(|| param_default(spec.kind));

            let value = if let ParamKind::Float { min, max, .. } = spec.kind {
                if rng.next_f64() < 0.30 {
                    let (af, bf) = (a.as_f64().unwrap_or(min), b.as_f64().unwrap_or(min));
                    let weight = rng.next_f64();
                    Value::from(clamp_f64(af * weight + bf * (1.0 - weight), min, max))
                } else if rng.next_f64() < 0.5 {
                    a
                } else {
                    b
                }
            } else if rng.next_f64() < 0.5 {
                a
            } else {
                b
            };
            (spec.name.to_string(), value)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvolutionPriority {
    Skip,
    Low,
    Medium,
    High,
}

/// Composite fitness: Sharpe 35% / profit factor 25% / win rate 15% /
/// drawdown 15% / expectancy 10%. Each component is normalized to roughly
/// [0, 1] before weighting so no single metric dominates by scale alone.
pub fn composite_fitness(snapshot: &PerformanceSnapshot) -> f64 {
    let sharpe_component = snapshot.sharpe.map(|s| clamp_f64(s / 3.0, 0.0, 1.0)).unwrap_or(0.0);
    let pf_component = snapshot.profit_factor.map(|pf| clamp_f64(pf / 3.0, 0.0, 1.0)).unwrap_or(0.0);
    let win_rate_component = clamp_f64(snapshot.win_rate / 100.0, 0.0, 1.0);
    let drawdown_component = snapshot.max_drawdown_pct.map(|dd| clamp_f64(1.0 - dd / 30.0, 0.0, 1.0)).unwrap_or(0.0);
    let expectancy_component = if snapshot.total_trades > 0 {
        clamp_f64((snapshot.net_pnl.to_string().parse::<f64>().unwrap_or(0.0) / snapshot.total_trades as f64) / 100.0 + 0.5, 0.0, 1.0)
    } else {
        0.0
    };

    sharpe_component * 0.35 + pf_component * 0.25 + win_rate_component * 0.15 + drawdown_component * 0.15 + expectancy_component * 0.10
}

/// Decide whether (and how urgently) a generation should be evolved. Skips
/// entirely below the minimum sample size so a handful of trades never
/// triggers a mutation cycle on noise.
pub fn decide_evolution(snapshot: &PerformanceSnapshot) -> EvolutionPriority {
    if snapshot.total_trades < 20 {
        return EvolutionPriority::Skip;
    }

    let sharpe = snapshot.sharpe.unwrap_or(0.0);
    let max_dd = snapshot.max_drawdown_pct.unwrap_or(0.0);
    let pf = snapshot.profit_factor.unwrap_or(1.0);

    if sharpe < 0.0 || max_dd > 15.0 || pf < 1.0 {
        return EvolutionPriority::High;
    }
    if snapshot.win_rate < 35.0 || sharpe < 0.5 {
        return EvolutionPriority::Medium;
    }
    if composite_fitness(snapshot) < 0.4 {
        return EvolutionPriority::Low;
    }
    EvolutionPriority::Skip
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RulesProfile, SessionMode};
    use crate::rng::derive_seed;
    use rust_decimal_macros::dec;

    fn snapshot(total_trades: u32, win_rate: f64, sharpe: Option<f64>, max_dd: Option<f64>, pf: Option<f64>) -> PerformanceSnapshot {
        PerformanceSnapshot {
            total_trades,
            win_rate,
            net_pnl: dec!(100),
            sharpe,
            max_drawdown_pct: max_dd,
            profit_factor: pf,
            rules_profile_used: RulesProfile::Standard,
            session_mode_used: SessionMode::RthUs,
        }
    }

    #[test]
    fn below_minimum_trades_skips_evolution() {
        assert_eq!(decide_evolution(&snapshot(5, 60.0, Some(1.0), Some(5.0), Some(1.5))), EvolutionPriority::Skip);
    }

    #[test]
    fn negative_sharpe_is_high_priority() {
        assert_eq!(decide_evolution(&snapshot(50, 60.0, Some(-0.2), Some(5.0), Some(1.5))), EvolutionPriority::High);
    }

    #[test]
    fn low_win_rate_is_medium_priority() {
        assert_eq!(decide_evolution(&snapshot(50, 30.0, Some(1.0), Some(5.0), Some(1.5))), EvolutionPriority::Medium);
    }

    #[test]
    fn healthy_snapshot_skips_or_low() {
        let priority = decide_evolution(&snapshot(50, 60.0, Some(1.5), Some(5.0), Some(2.0)));
        assert!(matches!(priority, EvolutionPriority::Skip | EvolutionPriority::Low));
    }

    #[test]
    fn adaptive_strength_decays_with_generation() {
        let s0 = adaptive_strength(0.5, 0);
        let s20 = adaptive_strength(0.5, 20);
        assert!(s20 < s0);
        assert!((s0 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mutate_generation_is_deterministic_for_same_seed() {
        let parent: HashMap<String, Value> = [("lookback_bars".to_string(), Value::from(20)), ("breakout_atr_mult".to_string(), Value::from(1.5))]
            .into_iter()
            .collect();

        let seed = derive_seed("bot-1", "session-1");
        let mut rng1 = Mulberry32::new(seed);
        let mut rng2 = Mulberry32::new(seed);

        let a = mutate_generation("breakout", &parent, 1, MutationType::Gaussian, 1.0, 0.2, None, &mut rng1);
        let b = mutate_generation("breakout", &parent, 1, MutationType::Gaussian, 1.0, 0.2, None, &mut rng2);
        assert_eq!(a.get("lookback_bars"), b.get("lookback_bars"));
    }

    #[test]
    fn regime_aware_uses_crisis_tuning_in_high_vol() {
        let (rate, strength) = regime_aware_rate_strength(UnifiedRegime::HighVolCrisis);
        assert_eq!(rate, 0.40);
        assert_eq!(strength, 0.50);
    }

    #[test]
    fn crossover_only_draws_from_the_two_parents_for_non_float_params() {
        let mut rng = Mulberry32::new(derive_seed("bot", "sess"));
        let a: HashMap<String, Value> = [("session".to_string(), Value::from("RTH"))].into_iter().collect();
        let b: HashMap<String, Value> = [("session".to_string(), Value::from("ETH"))].into_iter().collect();
        let child = crossover("vwap_touch", &a, &b, &mut rng);
        let session = child.get("session").unwrap().as_str().unwrap();
        assert!(session == "RTH" || session == "ETH" || session == "BOTH");
    }
}
