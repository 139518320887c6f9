// =============================================================================
// Domain model — the long-lived entities every other module operates on
// =============================================================================
//
// Plain data structs with no behavior beyond small derivations; the modules
// that own lifecycle rules (`stage_engine`, `backtest`, `risk`, `audit`)
// mutate these through their own functions rather than methods living here,
// matching the teacher's separation between `types.rs`/`app_state.rs` data
// and the logic modules that act on it.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BacktestErrorCode, Severity};
use crate::types::{SessionMode, Stage};

// =============================================================================
// Bot
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub name: String,
    pub stage: Stage,
    pub symbol: String,
    pub archetype_id: Option<String>,
    pub strategy_config: HashMap<String, serde_json::Value>,
    pub risk_config: RiskConfig,
    pub session_mode: SessionMode,
    pub current_generation_id: Uuid,
    pub stage_locked_until: Option<DateTime<Utc>>,
    pub peak_equity: Decimal,
    pub manual_promotion_mode: bool,
    pub created_at: DateTime<Utc>,
}

/// Required keys per §3: `stopLossTicks` and `maxPositionSize` always
/// present; everything else is archetype-specific and lives in
/// `strategy_config` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stop_loss_ticks: i64,
    pub max_position_size: u32,
}

impl Bot {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

// =============================================================================
// Generation
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub number: u32,
    pub parent_number: Option<u32>,
    pub strategy_config: HashMap<String, serde_json::Value>,
    pub baseline_valid: bool,
    pub baseline_backtest_id: Option<Uuid>,
    pub baseline_failure_reason: Option<String>,
    pub performance_snapshot: Option<PerformanceSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub total_trades: u32,
    pub win_rate: f64,
    pub net_pnl: Decimal,
    pub sharpe: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub profit_factor: Option<f64>,
    pub rules_profile_used: RulesProfile,
    pub session_mode_used: SessionMode,
}

// =============================================================================
// BacktestSession
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenanceStatus {
    Verified,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulesProfile {
    TrialsRelaxed,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub seed: u32,
    pub config_hash: String,
    pub session_filter: String,
    pub fill_model: String,
    pub sampling_method: String,
    pub history_range: (DateTime<Utc>, DateTime<Utc>),
    pub instrument_symbol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: Option<f64>,
    pub net_pnl: Option<Decimal>,
    pub sharpe: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub profit_factor: Option<f64>,
    pub expectancy: Option<Decimal>,
}

impl SessionMetrics {
    /// §8 invariant 2: a completed session with trades must have every
    /// metric populated.
    pub fn satisfies_completeness_invariant(&self, status: SessionStatus) -> bool {
        if status != SessionStatus::Completed || self.total_trades == 0 {
            return true;
        }
        self.win_rate.is_some()
            && self.net_pnl.is_some()
            && self.sharpe.is_some()
            && self.max_drawdown_pct.is_some()
            && self.profit_factor.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSession {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub generation_id: Uuid,
    pub status: SessionStatus,
    pub config_snapshot: ConfigSnapshot,
    pub rules_hash: Option<String>,
    pub expected_entry_condition: Option<String>,
    pub actual_entry_condition: Option<String>,
    pub provenance_status: Option<ProvenanceStatus>,
    pub rules_profile_used: Option<RulesProfile>,
    pub session_mode_used: SessionMode,
    pub metrics: SessionMetrics,
    pub total_bar_count: u32,
    pub session_filter_bar_count: u32,
    pub relaxed_flags_applied: Vec<String>,
    pub error_classification: Option<ErrorClassificationRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassificationRecord {
    pub code: BacktestErrorCode,
    pub severity: Severity,
    pub should_halt: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub equity: Decimal,
    pub drawdown_pct: f64,
}

// =============================================================================
// TradeLog
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLog {
    pub id: Uuid,
    pub backtest_session_id: Uuid,
    pub entry_reason_code: String,
    pub side: crate::types::Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_ts: DateTime<Utc>,
    pub exit_ts: DateTime<Utc>,
    pub exit_reason: String,
    pub quantity: u32,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub slippage: Decimal,
    pub net_pnl: Decimal,
    pub trace_id: String,
    pub rule_version: String,
}

// =============================================================================
// GovernanceApproval
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceApproval {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub requested_action: String,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub requested_by: String,
    pub reviewed_by: Option<String>,
    pub status: ApprovalStatus,
    pub justification: String,
    pub review_notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metrics_snapshot: SessionMetrics,
}

// =============================================================================
// FleetRiskState
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KillSwitchTier {
    Normal,
    Soft,
    Hard,
    Emergency,
}

impl KillSwitchTier {
    pub fn step_down(self) -> Self {
        match self {
            Self::Emergency => Self::Hard,
            Self::Hard => Self::Soft,
            Self::Soft => Self::Normal,
            Self::Normal => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub net_contracts: i64,
    pub gross_contracts: u64,
    pub notional: Decimal,
    pub per_symbol: HashMap<String, i64>,
    pub per_sector: HashMap<String, i64>,
    pub per_stage: HashMap<Stage, i64>,
    pub concentration_hhi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetRiskState {
    pub tier: KillSwitchTier,
    pub tier_entered_at: DateTime<Utc>,
    pub exposure: ExposureSnapshot,
    pub daily_pnl: Decimal,
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
    pub drawdown_pct: f64,
    pub active_violations: Vec<String>,
    pub self_healing: bool,
}

impl FleetRiskState {
    pub fn new_normal(starting_equity: Decimal) -> Self {
        Self {
            tier: KillSwitchTier::Normal,
            tier_entered_at: Utc::now(),
            exposure: ExposureSnapshot {
                net_contracts: 0,
                gross_contracts: 0,
                notional: Decimal::ZERO,
                per_symbol: HashMap::new(),
                per_sector: HashMap::new(),
                per_stage: HashMap::new(),
                concentration_hhi: 0.0,
            },
            daily_pnl: Decimal::ZERO,
            peak_equity: starting_equity,
            current_equity: starting_equity,
            drawdown_pct: 0.0,
            active_violations: Vec::new(),
            self_healing: false,
        }
    }
}

// =============================================================================
// IdempotencyRecord
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub cached_response: Option<String>,
    pub status_code: Option<u16>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Supplemental entities (§3.1)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: String,
    pub severity: Severity,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub summary: String,
    pub bot_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_switch_tier_steps_down_one_at_a_time() {
        assert_eq!(KillSwitchTier::Emergency.step_down(), KillSwitchTier::Hard);
        assert_eq!(KillSwitchTier::Hard.step_down(), KillSwitchTier::Soft);
        assert_eq!(KillSwitchTier::Soft.step_down(), KillSwitchTier::Normal);
        assert_eq!(KillSwitchTier::Normal.step_down(), KillSwitchTier::Normal);
    }

    #[test]
    fn tier_ordering_ranks_emergency_highest() {
        assert!(KillSwitchTier::Emergency > KillSwitchTier::Hard);
        assert!(KillSwitchTier::Hard > KillSwitchTier::Soft);
        assert!(KillSwitchTier::Soft > KillSwitchTier::Normal);
    }

    #[test]
    fn completeness_invariant_holds_for_zero_trade_sessions() {
        let metrics = SessionMetrics::default();
        assert!(metrics.satisfies_completeness_invariant(SessionStatus::Completed));
    }

    #[test]
    fn completeness_invariant_fails_when_trades_present_but_metrics_missing() {
        let metrics = SessionMetrics { total_trades: 5, ..Default::default() };
        assert!(!metrics.satisfies_completeness_invariant(SessionStatus::Completed));
    }
}
