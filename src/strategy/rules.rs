// =============================================================================
// StrategyRules — derived (not stored) structure built fresh per backtest
// =============================================================================
//
// Built from an archetype plus a bot's `strategyConfig` overrides, never
// persisted directly — only its `rulesHash` and the resolved entry-condition
// type are written to the session row, so the hash is the provenance anchor
// a replay can check against.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::exit::triple_barrier::ExitRules;
use crate::types::EntryConditionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPredicateConfig {
    pub thresholds: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    pub volume_multiple: f64,
    pub require_trend_side: bool,
    pub momentum_threshold: f64,
    pub max_volatility_atr_pct: f64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            volume_multiple: 1.2,
            require_trend_side: true,
            momentum_threshold: 0.0,
            max_volatility_atr_pct: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    pub max_spread_ticks: i64,
    pub block_on_opposing_momentum: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self { max_spread_ticks: 20, block_on_opposing_momentum: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBlock {
    pub stop_loss_ticks: i64,
    pub max_position_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBlock {
    /// ISO weekday numbers (1=Mon .. 7=Sun) the strategy is allowed to trade.
    pub trading_days: Vec<u8>,
    pub rth_start: String,
    pub rth_end: String,
    pub no_trade_windows: Vec<(String, String)>,
}

impl Default for SessionBlock {
    fn default() -> Self {
        Self {
            trading_days: vec![1, 2, 3, 4, 5],
            rth_start: "09:30".to_string(),
            rth_end: "16:15".to_string(),
            no_trade_windows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRules {
    pub version: String,
    pub archetype: String,
    pub entry_condition_type: EntryConditionType,
    pub entry_predicate: EntryPredicateConfig,
    pub confirmations: ConfirmationConfig,
    pub invalidations: InvalidationConfig,
    pub exit_rules: ExitRules,
    pub risk: RiskBlock,
    pub session: SessionBlock,
}

impl StrategyRules {
    /// SHA-256 of the canonical (field-order-stable) JSON serialization,
    /// hex-encoded.
    pub fn rules_hash(&self) -> String {
        let canonical = serde_json::to_string(self).expect("StrategyRules always serializes");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Build the default threshold set for an entry-condition type, used as the
/// PRODUCTION baseline before any `strategyConfig` override is applied.
pub fn default_thresholds(entry: EntryConditionType) -> HashMap<String, f64> {
    let mut m = HashMap::new();
    match entry {
        EntryConditionType::Breakout => {
            m.insert("range_bars".to_string(), 20.0);
            m.insert("breakout_ticks".to_string(), 4.0);
        }
        EntryConditionType::MeanReversion => {
            m.insert("rsi_overbought".to_string(), 70.0);
            m.insert("rsi_oversold".to_string(), 30.0);
            m.insert("deviation_atr_mult".to_string(), 2.0);
        }
        EntryConditionType::VwapTouch => {
            m.insert("band_ticks".to_string(), 2.0);
        }
        EntryConditionType::TrendContinuation => {
            m.insert("fast_ema".to_string(), 9.0);
            m.insert("slow_ema".to_string(), 21.0);
        }
        EntryConditionType::GapFade | EntryConditionType::GapFill => {
            m.insert("gap_atr_mult".to_string(), 0.5);
        }
        EntryConditionType::Reversal => {
            m.insert("rsi_extreme".to_string(), 80.0);
            m.insert("lookback_bars".to_string(), 10.0);
        }
        EntryConditionType::RangeScalp => {
            m.insert("range_bars".to_string(), 14.0);
            m.insert("band_fraction".to_string(), 0.15);
        }
        EntryConditionType::MomentumSurge => {
            m.insert("momentum_threshold".to_string(), 3.0);
            m.insert("volume_multiple".to_string(), 1.5);
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rules(entry: EntryConditionType) -> StrategyRules {
        StrategyRules {
            version: "1".to_string(),
            archetype: "breakout".to_string(),
            entry_condition_type: entry,
            entry_predicate: EntryPredicateConfig { thresholds: default_thresholds(entry) },
            confirmations: ConfirmationConfig::default(),
            invalidations: InvalidationConfig::default(),
            exit_rules: ExitRules {
                stop_loss_ticks: 10,
                take_profit_ticks: 20,
                trailing_stop: None,
                time_stop_bars: Some(100),
            },
            risk: RiskBlock { stop_loss_ticks: 10, max_position_size: 5 },
            session: SessionBlock::default(),
        }
    }

    #[test]
    fn rules_hash_is_stable_for_identical_input() {
        let a = sample_rules(EntryConditionType::Breakout);
        let b = sample_rules(EntryConditionType::Breakout);
        assert_eq!(a.rules_hash(), b.rules_hash());
    }

    #[test]
    fn rules_hash_differs_when_entry_condition_differs() {
        let a = sample_rules(EntryConditionType::Breakout);
        let b = sample_rules(EntryConditionType::MeanReversion);
        assert_ne!(a.rules_hash(), b.rules_hash());
    }

    #[test]
    fn rules_hash_is_64_hex_chars() {
        let a = sample_rules(EntryConditionType::Breakout);
        assert_eq!(a.rules_hash().len(), 64);
    }
}
