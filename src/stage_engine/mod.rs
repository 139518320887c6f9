// =============================================================================
// Stage Engine — promotion/demotion state machine, §4.3
// =============================================================================
//
// Bots climb a fixed ladder (TRIALS → PAPER → SHADOW → CANARY → LIVE) or
// retreat one rung at a time under the demotion triggers below; KILLED is a
// terminal sink reachable from any stage via the risk engine's blown-account
// check, never via this module directly. CANARY→LIVE never executes here —
// it only ever produces a governance request (`governance.rs`); every other
// transition is self-executing once its gate passes.
// =============================================================================

pub mod governance;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{event_types, for_entity, AuditLog};
use crate::domain::Bot;
use crate::types::Stage;

/// The metrics snapshot a gate evaluation reads. Confidence/uniqueness
/// scores are produced upstream (signal-quality scoring is out of this
/// core's scope per §1) and passed in by the caller; everything else comes
/// straight off `BacktestSession.metrics`/`Generation.performance_snapshot`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateMetrics {
    pub sharpe: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub win_rate: Option<f64>,
    pub total_trades: Option<u32>,
    pub profit_factor: Option<f64>,
    pub expectancy: Option<Decimal>,
    pub confidence_score: Option<f64>,
    pub uniqueness_score: Option<f64>,
    pub days_in_stage: u32,
    pub consecutive_losing_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDecision {
    Promote(Stage),
    Demote(Stage),
    /// CANARY→LIVE is never self-executed; the caller must route this
    /// through `governance::request`.
    RequiresGovernance(Stage),
}

/// §4.3 SEV-0 hard stop, checked before any gate: missing core metrics (or
/// too few trades) block promotion regardless of how the present metrics
/// look. Expectancy-null is a warning only, never a blocker.
fn sev0_blocks_promotion(m: &GateMetrics, target: Stage) -> bool {
    let min_trades = if target == Stage::Live { 50 } else { 10 };
    m.sharpe.is_none()
        || m.max_drawdown_pct.is_none()
        || m.win_rate.is_none()
        || m.profit_factor.is_none()
        || m.total_trades.map(|t| t < min_trades).unwrap_or(true)
}

fn promotion_gate_passes(from: Stage, m: &GateMetrics) -> bool {
    match from {
        Stage::Trials => m.confidence_score.unwrap_or(0.0) >= 65.0 && m.uniqueness_score.unwrap_or(0.0) >= 40.0,
        Stage::Paper => {
            m.win_rate.unwrap_or(0.0) >= 45.0 && m.profit_factor.unwrap_or(0.0) >= 1.2 && m.total_trades.unwrap_or(0) >= 20
        }
        Stage::Shadow => {
            m.win_rate.unwrap_or(0.0) >= 50.0
                && m.profit_factor.unwrap_or(0.0) >= 1.4
                && m.sharpe.unwrap_or(0.0) >= 0.8
                && m.max_drawdown_pct.unwrap_or(100.0) <= 15.0
                && m.days_in_stage >= 5
        }
        // CANARY→LIVE has no metric gate of its own — it is gated entirely
        // by dual-control governance.
        Stage::Canary => true,
        Stage::Live | Stage::Killed => false,
    }
}

fn demotion_trigger_fires(from: Stage, m: &GateMetrics) -> bool {
    match from {
        Stage::Live => m.max_drawdown_pct.unwrap_or(0.0) > 20.0 || m.profit_factor.unwrap_or(f64::MAX) < 1.0,
        Stage::Canary => m.sharpe.unwrap_or(f64::MAX) < 0.5 || m.consecutive_losing_days >= 3,
        Stage::Shadow => m.win_rate.unwrap_or(100.0) < 35.0,
        Stage::Trials | Stage::Paper | Stage::Killed => false,
    }
}

/// One evaluation cycle for a single bot (§4.3 "Evaluation order"): demotion
/// is checked first, then promotion — never both in one cycle. Returns
/// `None` if the bot is locked, archived/killed, or (for non-CANARY stages)
/// in manual-promotion mode.
pub fn evaluate_cycle(bot: &Bot, m: &GateMetrics) -> Option<StageDecision> {
    if bot.is_terminal() {
        return None;
    }
    if let Some(until) = bot.stage_locked_until {
        if until > Utc::now() {
            return None;
        }
    }

    if let Some(target) = bot.stage.prev() {
        if demotion_trigger_fires(bot.stage, m) {
            return Some(StageDecision::Demote(target));
        }
    }

    if bot.manual_promotion_mode && bot.stage != Stage::Canary {
        return None;
    }

    let target = bot.stage.next()?;
    if sev0_blocks_promotion(m, target) {
        return None;
    }
    if !promotion_gate_passes(bot.stage, m) {
        return None;
    }

    if bot.stage == Stage::Canary {
        Some(StageDecision::RequiresGovernance(target))
    } else {
        Some(StageDecision::Promote(target))
    }
}

/// Per-bot registry plus the §4.3.1 consecutive-losing-days wiring: a
/// rolling log of daily realized P&L, populated by the backtest executor's
/// per-session net P&L bucketed by session date.
pub struct BotLifecycleRegistry {
    bots: RwLock<HashMap<Uuid, Bot>>,
    daily_pnl: RwLock<HashMap<Uuid, Vec<(NaiveDate, Decimal)>>>,
}

impl BotLifecycleRegistry {
    pub fn new() -> Self {
        Self { bots: RwLock::new(HashMap::new()), daily_pnl: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, bot: Bot) {
        self.bots.write().insert(bot.id, bot);
    }

    pub fn get(&self, bot_id: Uuid) -> Option<Bot> {
        self.bots.read().get(&bot_id).cloned()
    }

    pub fn all(&self) -> Vec<Bot> {
        self.bots.read().values().cloned().collect()
    }

    /// Record one day's realized P&L for a bot, keeping the log sorted by
    /// date (sessions may complete out of order across concurrent tasks).
    pub fn record_daily_pnl(&self, bot_id: Uuid, date: NaiveDate, pnl: Decimal) {
        let mut log = self.daily_pnl.write();
        let entries = log.entry(bot_id).or_default();
        if let Some(existing) = entries.iter_mut().find(|(d, _)| *d == date) {
            existing.1 += pnl;
        } else {
            entries.push((date, pnl));
        }
        entries.sort_by_key(|(d, _)| *d);
    }

    /// Walk the daily P&L log backward from today, counting a leading run of
    /// negative-P&L days. Resolves the Open Question in §4.3.1.
    pub fn consecutive_losing_days(&self, bot_id: Uuid) -> u32 {
        let log = self.daily_pnl.read();
        let Some(entries) = log.get(&bot_id) else { return 0 };
        entries.iter().rev().take_while(|(_, pnl)| *pnl < Decimal::ZERO).count() as u32
    }

    /// Transactional stage change: mutate the bot's stage and append the
    /// audit entry while holding the bot's write lock, so no other task can
    /// observe a half-applied transition. Post-commit side effects (the
    /// caller's notification/activity-log hooks) should only run once this
    /// returns `Some`.
    pub fn execute_stage_change(&self, bot_id: Uuid, new_stage: Stage, audit: &AuditLog) -> Option<Bot> {
        let mut bots = self.bots.write();
        let bot = bots.get_mut(&bot_id)?;
        let from_stage = bot.stage;
        bot.stage = new_stage;
        let updated = bot.clone();

        let event_type = if new_stage.is_terminal() {
            event_types::KILLED
        } else if new_stage > from_stage {
            event_types::PROMOTED
        } else {
            event_types::DEMOTED
        };

        audit.append(for_entity(
            event_type,
            "bot",
            bot_id,
            "system",
            "stage_engine",
            json!({"from_stage": from_stage.to_string(), "to_stage": new_stage.to_string()}),
        ));

        info!(bot_id = %bot_id, from = %from_stage, to = %new_stage, "stage transition committed");
        Some(updated)
    }
}

impl Default for BotLifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskConfig;
    use crate::types::SessionMode;
    use std::collections::HashMap as Map;

    fn bot(stage: Stage) -> Bot {
        Bot {
            id: Uuid::new_v4(),
            name: "Test Bot".to_string(),
            stage,
            symbol: "MES".to_string(),
            archetype_id: Some("breakout".to_string()),
            strategy_config: Map::new(),
            risk_config: RiskConfig { stop_loss_ticks: 20, max_position_size: 1 },
            session_mode: SessionMode::RthUs,
            current_generation_id: Uuid::new_v4(),
            stage_locked_until: None,
            peak_equity: Decimal::ZERO,
            manual_promotion_mode: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sev0_blocks_promotion_with_too_few_trades() {
        let m = GateMetrics { sharpe: Some(1.0), max_drawdown_pct: Some(5.0), win_rate: Some(60.0), profit_factor: Some(1.5), total_trades: Some(5), ..Default::default() };
        assert!(sev0_blocks_promotion(&m, Stage::Paper));
    }

    #[test]
    fn trials_to_paper_gate_requires_confidence_and_uniqueness() {
        let b = bot(Stage::Trials);
        let mut m = GateMetrics {
            sharpe: Some(1.0),
            max_drawdown_pct: Some(5.0),
            win_rate: Some(60.0),
            profit_factor: Some(1.5),
            total_trades: Some(15),
            confidence_score: Some(70.0),
            uniqueness_score: Some(50.0),
            ..Default::default()
        };
        assert_eq!(evaluate_cycle(&b, &m), Some(StageDecision::Promote(Stage::Paper)));

        m.confidence_score = Some(10.0);
        assert_eq!(evaluate_cycle(&b, &m), None);
    }

    #[test]
    fn canary_to_live_requires_governance_not_direct_promotion() {
        let b = bot(Stage::Canary);
        let m = GateMetrics { sharpe: Some(1.0), max_drawdown_pct: Some(5.0), win_rate: Some(60.0), profit_factor: Some(1.5), total_trades: Some(60), ..Default::default() };
        assert_eq!(evaluate_cycle(&b, &m), Some(StageDecision::RequiresGovernance(Stage::Live)));
    }

    #[test]
    fn demotion_is_checked_before_promotion() {
        let b = bot(Stage::Live);
        // Would also fail to promote (Live has no next stage), but more
        // importantly a demotion trigger must win over any promotion path.
        let m = GateMetrics { max_drawdown_pct: Some(25.0), profit_factor: Some(0.5), ..Default::default() };
        assert_eq!(evaluate_cycle(&b, &m), Some(StageDecision::Demote(Stage::Canary)));
    }

    #[test]
    fn locked_bot_is_skipped() {
        let mut b = bot(Stage::Paper);
        b.stage_locked_until = Some(Utc::now() + chrono::Duration::hours(1));
        let m = GateMetrics { win_rate: Some(90.0), profit_factor: Some(5.0), total_trades: Some(100), sharpe: Some(3.0), max_drawdown_pct: Some(1.0), ..Default::default() };
        assert_eq!(evaluate_cycle(&b, &m), None);
    }

    #[test]
    fn consecutive_losing_days_counts_leading_negative_run() {
        let registry = BotLifecycleRegistry::new();
        let bot_id = Uuid::new_v4();
        let base = Utc::now().date_naive();
        registry.record_daily_pnl(bot_id, base - chrono::Duration::days(3), Decimal::from(100));
        registry.record_daily_pnl(bot_id, base - chrono::Duration::days(2), Decimal::from(-10));
        registry.record_daily_pnl(bot_id, base - chrono::Duration::days(1), Decimal::from(-5));
        registry.record_daily_pnl(bot_id, base, Decimal::from(-1));
        assert_eq!(registry.consecutive_losing_days(bot_id), 3);
    }

    #[test]
    fn execute_stage_change_is_transactional_with_audit_append() {
        let registry = BotLifecycleRegistry::new();
        let audit = AuditLog::new();
        let b = bot(Stage::Paper);
        let bot_id = b.id;
        registry.insert(b);

        let updated = registry.execute_stage_change(bot_id, Stage::Shadow, &audit).unwrap();
        assert_eq!(updated.stage, Stage::Shadow);
        assert_eq!(audit.len(), 1);
        assert!(audit.verify_hash_chain().is_ok());
    }
}
