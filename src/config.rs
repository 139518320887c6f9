// =============================================================================
// Runtime Configuration — environment-driven, hot-reloadable engine settings
// =============================================================================
//
// Every tunable lives here, parsed from environment variables the way the
// teacher's `main.rs` reads its own connection settings: plain
// `std::env::var` lookups with a typed default, no config-crate indirection.
// `#[serde(default = "...")]` on every field means a config blob persisted by
// an older build still deserializes here, matching the teacher's
// `RuntimeConfig::save` atomic tmp+rename persistence style.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Stage;

fn default_false() -> bool {
    false
}

fn default_fleet_risk_interval_ms() -> u64 {
    60_000
}

fn default_fallback_alert_threshold() -> f64 {
    0.05
}

fn default_variance_alert_threshold() -> f64 {
    0.001
}

fn default_max_contracts() -> MaxContractsByStage {
    MaxContractsByStage::default()
}

/// Per-stage position-size ceiling; earlier stages are simulated risk so
/// later stages get tighter real-capital limits by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxContractsByStage {
    #[serde(default = "default_trials_contracts")]
    pub trials: u32,
    #[serde(default = "default_paper_contracts")]
    pub paper: u32,
    #[serde(default = "default_shadow_contracts")]
    pub shadow: u32,
    #[serde(default = "default_canary_contracts")]
    pub canary: u32,
    #[serde(default = "default_live_contracts")]
    pub live: u32,
}

fn default_trials_contracts() -> u32 {
    10
}
fn default_paper_contracts() -> u32 {
    10
}
fn default_shadow_contracts() -> u32 {
    5
}
fn default_canary_contracts() -> u32 {
    2
}
fn default_live_contracts() -> u32 {
    1
}

impl Default for MaxContractsByStage {
    fn default() -> Self {
        Self {
            trials: default_trials_contracts(),
            paper: default_paper_contracts(),
            shadow: default_shadow_contracts(),
            canary: default_canary_contracts(),
            live: default_live_contracts(),
        }
    }
}

impl MaxContractsByStage {
    pub fn for_stage(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Trials => self.trials,
            Stage::Paper => self.paper,
            Stage::Shadow => self.shadow,
            Stage::Canary => self.canary,
            Stage::Live => self.live,
            Stage::Killed => 0,
        }
    }
}

/// Central runtime configuration. Constructed once at process start from the
/// environment via `RuntimeConfig::from_env`, then shared read-only through
/// `AppState` (mutation, where needed, happens through the owning
/// subsystem's own state, not by rewriting this struct in place).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Whether the backtest executor may fall back to the seeded simulator
    /// when the real provider is unavailable. Default false: a provider
    /// outage fails closed with `DATA_PROVENANCE_VIOLATION` rather than
    /// silently trading on synthetic data.
    #[serde(default = "default_false")]
    pub allow_sim_fallback: bool,

    /// Presence (not value) of a Databento key gates the real-data path.
    #[serde(default)]
    pub databento_api_key: Option<String>,

    /// Whether a FIX broker connection is configured for this deployment.
    #[serde(default = "default_false")]
    pub fix_enabled: bool,

    /// Fleet risk assessment cadence.
    #[serde(default = "default_fleet_risk_interval_ms")]
    pub fleet_risk_interval_ms: u64,

    #[serde(default = "default_max_contracts")]
    pub max_contracts: MaxContractsByStage,

    /// Fraction of sessions using the simulated fallback above which an
    /// operational alert should fire (observability is out of scope here,
    /// but the threshold itself is part of the contract).
    #[serde(default = "default_fallback_alert_threshold")]
    pub fallback_alert_threshold: f64,

    /// Variance threshold (e.g. for repeated-seed determinism checks) above
    /// which an alert should fire.
    #[serde(default = "default_variance_alert_threshold")]
    pub variance_alert_threshold: f64,

    /// Redis connection string; absence means the in-process `MemoryStore`
    /// backs the bar cache instead of `RedisStore`.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            allow_sim_fallback: false,
            databento_api_key: None,
            fix_enabled: false,
            fleet_risk_interval_ms: default_fleet_risk_interval_ms(),
            max_contracts: MaxContractsByStage::default(),
            fallback_alert_threshold: default_fallback_alert_threshold(),
            variance_alert_threshold: default_variance_alert_threshold(),
            redis_url: None,
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ALLOW_SIM_FALLBACK") {
            cfg.allow_sim_fallback = parse_bool(&v, cfg.allow_sim_fallback);
        }
        cfg.databento_api_key = std::env::var("DATABENTO_API_KEY").ok().filter(|s| !s.is_empty());
        if let Ok(v) = std::env::var("FIX_ENABLED") {
            cfg.fix_enabled = parse_bool(&v, cfg.fix_enabled);
        }
        if let Ok(v) = std::env::var("FLEET_RISK_INTERVAL_MS") {
            if let Ok(parsed) = v.parse() {
                cfg.fleet_risk_interval_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("FALLBACK_ALERT_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                cfg.fallback_alert_threshold = parsed;
            }
        }
        if let Ok(v) = std::env::var("VARIANCE_ALERT_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                cfg.variance_alert_threshold = parsed;
            }
        }
        cfg.redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        for (stage, var) in [
            (&mut cfg.max_contracts.trials, "MAX_CONTRACTS_TRIALS"),
            (&mut cfg.max_contracts.paper, "MAX_CONTRACTS_PAPER"),
            (&mut cfg.max_contracts.shadow, "MAX_CONTRACTS_SHADOW"),
            (&mut cfg.max_contracts.canary, "MAX_CONTRACTS_CANARY"),
            (&mut cfg.max_contracts.live, "MAX_CONTRACTS_LIVE"),
        ] {
            if let Ok(v) = std::env::var(var) {
                if let Ok(parsed) = v.parse() {
                    *stage = parsed;
                }
            }
        }

        info!(
            allow_sim_fallback = cfg.allow_sim_fallback,
            fix_enabled = cfg.fix_enabled,
            fleet_risk_interval_ms = cfg.fleet_risk_interval_ms,
            has_redis = cfg.redis_url.is_some(),
            "runtime config loaded from environment"
        );

        cfg
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) to avoid a torn file on crash.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize runtime config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

fn parse_bool(v: &str, default: bool) -> bool {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Fixed contract/violation limits for the fleet engine (§4.4); unlike the
/// per-stage contract caps above these are not env-tunable, they are the
/// platform-wide circuit breaker constants.
pub struct FleetLimits;

impl FleetLimits {
    pub const MAX_FLEET_CONTRACTS: u32 = 500;
    pub const MAX_FLEET_NOTIONAL: Decimal = dec!(500_000);
    pub const DRAWDOWN_WARNING_PCT: Decimal = dec!(10);
    pub const DRAWDOWN_SOFT_PCT: Decimal = dec!(15);
    pub const DRAWDOWN_EMERGENCY_PCT: Decimal = dec!(25);
    pub const SECTOR_CONCENTRATION_PCT: Decimal = dec!(60);
    pub const MAX_BOTS_PER_SYMBOL: u32 = 50;
    pub const SELF_HEAL_RECOVERY_PCT: Decimal = dec!(5);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_conservative() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.allow_sim_fallback);
        assert!(!cfg.fix_enabled);
        assert_eq!(cfg.fleet_risk_interval_ms, 60_000);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert!(!cfg.allow_sim_fallback);
        assert_eq!(cfg.max_contracts.live, 1);
    }

    #[test]
    fn max_contracts_by_stage_maps_correctly() {
        let limits = MaxContractsByStage::default();
        assert_eq!(limits.for_stage(Stage::Live), 1);
        assert_eq!(limits.for_stage(Stage::Trials), 10);
        assert_eq!(limits.for_stage(Stage::Killed), 0);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.fleet_risk_interval_ms, cfg2.fleet_risk_interval_ms);
    }

    #[test]
    fn parse_bool_falls_back_to_default_on_garbage() {
        assert!(parse_bool("nonsense", true));
        assert!(!parse_bool("nonsense", false));
        assert!(parse_bool("true", false));
        assert!(!parse_bool("0", true));
    }
}
