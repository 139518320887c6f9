// =============================================================================
// Risk Engine — per-bot gates + fleet kill switch, §4.4
// =============================================================================
//
// Two cooperating halves, same as the distilled spec's single section:
// per-bot gates checked before every new position open (this module), and
// the fleet-wide singleton (`fleet.rs`) assessed on its own timer. Both read
// the shared `PositionBook` (`positions.rs`) instead of the always-empty
// view the reference implementation carried.
// =============================================================================

pub mod fleet;
pub mod positions;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{event_types, for_entity, AuditLog};
use crate::domain::Bot;
use crate::stage_engine::BotLifecycleRegistry;
use crate::types::Stage;

use positions::PositionBook;

const DRAWDOWN_WARNING_PCT: f64 = 10.0;
const DRAWDOWN_SOFT_PCT: f64 = 15.0;
const DRAWDOWN_HARD_PCT: f64 = 20.0;
const BLOWN_ACCOUNT_DRAWDOWN_PCT: f64 = 30.0;
const BLOWN_ACCOUNT_CAPITAL_REMAINING_PCT: f64 = 10.0;

const DAILY_LOSS_WARNING_PCT: f64 = 2.0;
const DAILY_LOSS_SOFT_PCT: f64 = 3.0;
const DAILY_LOSS_HARD_PCT: f64 = 5.0;

const VAR_LIMIT_FRACTION: Decimal = dec!(0.05);

/// Block-level severity for a per-bot gate evaluation. Ordered so the
/// strictest result naturally wins when folding several gates together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockLevel {
    /// Log only — no operational effect.
    None,
    Warning,
    /// Block new position opens; exits still allowed.
    SoftBlock,
    /// Pause the bot; only broker-adapter-driven liquidation proceeds.
    HardBlock,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: BlockLevel,
    pub violations: Vec<String>,
}

fn drawdown_pct(peak: Decimal, current: Decimal) -> f64 {
    if peak.is_zero() {
        return 0.0;
    }
    ((peak - current) / peak * Decimal::from(100)).to_string().parse().unwrap_or(0.0)
}

fn tier(value: f64, warning: f64, soft: f64, hard: f64) -> BlockLevel {
    if value >= hard {
        BlockLevel::HardBlock
    } else if value >= soft {
        BlockLevel::SoftBlock
    } else if value >= warning {
        BlockLevel::Warning
    } else {
        BlockLevel::None
    }
}

/// Evaluate every per-bot gate in §4.4 for one bot ahead of a new position
/// open. `capital_remaining_pct` and `daily_pnl`/`start_of_day_balance` are
/// supplied by the caller (the accounting surface is out of this core's
/// scope, only the gate math is).
pub fn evaluate_bot(bot: &Bot, current_equity: Decimal, capital_remaining_pct: f64, daily_pnl: Decimal, start_of_day_balance: Decimal, positions: &PositionBook) -> RiskAssessment {
    let mut violations = Vec::new();
    let mut level = BlockLevel::None;

    if bot.stage.is_terminal() {
        violations.push("bot is KILLED".to_string());
        return RiskAssessment { level: BlockLevel::HardBlock, violations };
    }

    let dd = drawdown_pct(bot.peak_equity, current_equity);
    let dd_level = tier(dd, DRAWDOWN_WARNING_PCT, DRAWDOWN_SOFT_PCT, DRAWDOWN_HARD_PCT);
    if dd_level > BlockLevel::None {
        violations.push(format!("drawdown {dd:.2}% ({dd_level:?})"));
        level = level.max(dd_level);
    }

    if daily_pnl < Decimal::ZERO && !start_of_day_balance.is_zero() {
        let loss_pct: f64 = (daily_pnl.abs() / start_of_day_balance * Decimal::from(100)).to_string().parse().unwrap_or(0.0);
        let daily_level = tier(loss_pct, DAILY_LOSS_WARNING_PCT, DAILY_LOSS_SOFT_PCT, DAILY_LOSS_HARD_PCT);
        if daily_level > BlockLevel::None {
            violations.push(format!("daily loss {loss_pct:.2}% ({daily_level:?})"));
            level = level.max(daily_level);
        }
    }

    let var_estimate = positions.bot_var_estimate(bot.id, VAR_LIMIT_FRACTION);
    let var_limit = current_equity * VAR_LIMIT_FRACTION;
    if !var_limit.is_zero() && var_estimate > var_limit {
        violations.push(format!("VaR estimate {var_estimate} exceeds {var_limit}"));
        level = level.max(BlockLevel::SoftBlock);
    }

    if dd >= BLOWN_ACCOUNT_DRAWDOWN_PCT || capital_remaining_pct < BLOWN_ACCOUNT_CAPITAL_REMAINING_PCT {
        violations.push("blown account threshold breached".to_string());
        level = BlockLevel::HardBlock;
    }

    RiskAssessment { level, violations }
}

/// §8 invariant 6: a KILLED bot can never open a position, independent of
/// everything else. `canOpenPosition` callers should gate on this before
/// even constructing a `RiskAssessment`.
pub fn can_open_position(bot: &Bot, assessment: &RiskAssessment) -> bool {
    !bot.stage.is_terminal() && assessment.level < BlockLevel::SoftBlock
}

/// If the blown-account threshold fired, move the bot to KILLED and append
/// both the stage-change and the `account_attempts`-equivalent audit record,
/// atomically from the caller's point of view (both happen before this
/// returns).
pub fn enforce_blown_account(bot_id: Uuid, assessment: &RiskAssessment, bots: &BotLifecycleRegistry, audit: &AuditLog) -> bool {
    let blown = assessment.violations.iter().any(|v| v.contains("blown account"));
    if !blown {
        return false;
    }
    if bots.execute_stage_change(bot_id, Stage::Killed, audit).is_some() {
        audit.append(for_entity(
            event_types::BLOWN_ACCOUNT,
            "bot",
            bot_id,
            "system",
            "risk_engine",
            json!({"violations": assessment.violations}),
        ));
        warn!(bot_id = %bot_id, "blown account — bot moved to KILLED");
        true
    } else {
        false
    }
}

pub fn log_assessment(bot_id: Uuid, assessment: &RiskAssessment) {
    match assessment.level {
        BlockLevel::None => {}
        BlockLevel::Warning => info!(bot_id = %bot_id, violations = ?assessment.violations, "risk gate warning"),
        BlockLevel::SoftBlock | BlockLevel::HardBlock => warn!(bot_id = %bot_id, level = ?assessment.level, violations = ?assessment.violations, "risk gate block"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskConfig;
    use crate::types::SessionMode;
    use std::collections::HashMap;

    fn bot() -> Bot {
        Bot {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            stage: Stage::Live,
            symbol: "MES".to_string(),
            archetype_id: None,
            strategy_config: HashMap::new(),
            risk_config: RiskConfig { stop_loss_ticks: 20, max_position_size: 2 },
            session_mode: SessionMode::RthUs,
            current_generation_id: Uuid::new_v4(),
            stage_locked_until: None,
            peak_equity: dec!(10_000),
            manual_promotion_mode: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn drawdown_exactly_at_boundary_trips_the_higher_tier() {
        // peak 10_000, current 8_500 => 15% drawdown, exactly at SOFT.
        let level = tier(15.0, DRAWDOWN_WARNING_PCT, DRAWDOWN_SOFT_PCT, DRAWDOWN_HARD_PCT);
        assert_eq!(level, BlockLevel::SoftBlock);
    }

    #[test]
    fn killed_bot_is_hard_blocked_outright() {
        let mut b = bot();
        b.stage = Stage::Killed;
        let positions = PositionBook::new();
        let assessment = evaluate_bot(&b, dec!(10_000), 100.0, Decimal::ZERO, dec!(10_000), &positions);
        assert_eq!(assessment.level, BlockLevel::HardBlock);
        assert!(!can_open_position(&b, &assessment));
    }

    #[test]
    fn blown_account_moves_bot_to_killed() {
        let registry = BotLifecycleRegistry::new();
        let audit = AuditLog::new();
        let b = bot();
        let bot_id = b.id;
        registry.insert(b.clone());
        let positions = PositionBook::new();

        // current equity far below peak => drawdown > 30%.
        let assessment = evaluate_bot(&b, dec!(6_000), 5.0, Decimal::ZERO, dec!(10_000), &positions);
        assert_eq!(assessment.level, BlockLevel::HardBlock);
        assert!(enforce_blown_account(bot_id, &assessment, &registry, &audit));
        assert_eq!(registry.get(bot_id).unwrap().stage, Stage::Killed);
    }

    #[test]
    fn healthy_bot_has_no_violations() {
        let b = bot();
        let positions = PositionBook::new();
        let assessment = evaluate_bot(&b, dec!(10_000), 100.0, Decimal::ZERO, dec!(10_000), &positions);
        assert_eq!(assessment.level, BlockLevel::None);
        assert!(can_open_position(&b, &assessment));
    }
}
