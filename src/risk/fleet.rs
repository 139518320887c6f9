// =============================================================================
// Fleet Risk Engine — platform-wide kill switch, §4.4 + §4.4.2
// =============================================================================
//
// A single-task singleton, assessed on its own timer (`fleet_risk_interval_ms`,
// default 60s) rather than per-request, so every exposure read and tier
// transition is serialized through one owner — the same ordering guarantee
// the teacher's account-reconciliation loop gives its own state.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::{event_types, for_entity, AuditLog};
use crate::broker::BrokerAdapter;
use crate::config::FleetLimits;
use crate::domain::{ExposureSnapshot, FleetRiskState, KillSwitchTier};
use crate::types::Stage;

use super::positions::PositionBook;

/// Action a caller must take as a consequence of the tier this cycle landed
/// on. The fleet engine itself only decides; dispatching the action (pausing
/// instances, submitting exit orders) is done by the caller holding the
/// relevant handles, matching the teacher's "assess then act" split between
/// its risk engine and execution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierAction {
    None,
    BlockNewPositions,
    PauseAllRunning,
    LiquidateAll,
}

pub fn action_for_tier(tier: KillSwitchTier) -> TierAction {
    match tier {
        KillSwitchTier::Normal => TierAction::None,
        KillSwitchTier::Soft => TierAction::BlockNewPositions,
        KillSwitchTier::Hard => TierAction::PauseAllRunning,
        KillSwitchTier::Emergency => TierAction::LiquidateAll,
    }
}

fn hhi(per_symbol: &HashMap<String, i64>, gross_contracts: u64) -> f64 {
    if gross_contracts == 0 {
        return 0.0;
    }
    per_symbol
        .values()
        .map(|&c| {
            let share = c.unsigned_abs() as f64 / gross_contracts as f64;
            share * share
        })
        .sum()
}

fn aggregate_exposure(positions: &PositionBook) -> ExposureSnapshot {
    let all = positions.all();
    let mut per_symbol: HashMap<String, i64> = HashMap::new();
    let mut per_sector: HashMap<String, i64> = HashMap::new();
    let mut per_stage: HashMap<Stage, i64> = HashMap::new();
    let mut net_contracts: i64 = 0;
    let mut gross_contracts: u64 = 0;
    let mut notional = Decimal::ZERO;

    for p in &all {
        let signed = match p.side {
            crate::types::Side::Long => p.quantity as i64,
            crate::types::Side::Short => -(p.quantity as i64),
        };
        net_contracts += signed;
        gross_contracts += p.quantity as u64;
        notional += p.notional;
        *per_symbol.entry(p.symbol.clone()).or_insert(0) += signed;
        *per_sector.entry(p.sector.clone()).or_insert(0) += signed;
        *per_stage.entry(p.stage).or_insert(0) += signed;
    }

    let concentration_hhi = hhi(&per_symbol, gross_contracts);

    ExposureSnapshot { net_contracts, gross_contracts, notional, per_symbol, per_sector, per_stage, concentration_hhi }
}

/// Violations found this cycle, independent of what tier they ultimately map
/// to — kept separate from tier assignment so the active_violations list on
/// `FleetRiskState` always explains *why*.
fn detect_violations(exposure: &ExposureSnapshot, drawdown_pct: f64) -> Vec<String> {
    let mut violations = Vec::new();

    if exposure.gross_contracts as u32 > FleetLimits::MAX_FLEET_CONTRACTS {
        violations.push(format!("fleet gross contracts {} exceeds {}", exposure.gross_contracts, FleetLimits::MAX_FLEET_CONTRACTS));
    }
    if exposure.notional > FleetLimits::MAX_FLEET_NOTIONAL {
        violations.push(format!("fleet notional {} exceeds {}", exposure.notional, FleetLimits::MAX_FLEET_NOTIONAL));
    }
    let concentration_pct = exposure.concentration_hhi * 100.0;
    let sector_limit: f64 = FleetLimits::SECTOR_CONCENTRATION_PCT.to_string().parse().unwrap_or(60.0);
    if concentration_pct > sector_limit {
        violations.push(format!("sector concentration {concentration_pct:.1}% exceeds {sector_limit:.1}%"));
    }
    for (symbol, count) in &exposure.per_symbol {
        if count.unsigned_abs() as u32 > FleetLimits::MAX_BOTS_PER_SYMBOL {
            violations.push(format!("symbol {symbol} exposure {count} exceeds per-symbol cap {}", FleetLimits::MAX_BOTS_PER_SYMBOL));
        }
    }

    let warning: f64 = FleetLimits::DRAWDOWN_WARNING_PCT.to_string().parse().unwrap_or(10.0);
    let soft: f64 = FleetLimits::DRAWDOWN_SOFT_PCT.to_string().parse().unwrap_or(15.0);
    let emergency: f64 = FleetLimits::DRAWDOWN_EMERGENCY_PCT.to_string().parse().unwrap_or(25.0);
    if drawdown_pct >= emergency {
        violations.push(format!("fleet drawdown {drawdown_pct:.2}% at EMERGENCY threshold {emergency:.1}%"));
    } else if drawdown_pct >= soft {
        violations.push(format!("fleet drawdown {drawdown_pct:.2}% at SOFT threshold {soft:.1}%"));
    } else if drawdown_pct >= warning {
        violations.push(format!("fleet drawdown {drawdown_pct:.2}% at WARNING threshold {warning:.1}%"));
    }

    violations
}

fn recovery_threshold_pct() -> f64 {
    FleetLimits::SELF_HEAL_RECOVERY_PCT.to_string().parse().unwrap_or(5.0)
}

fn tier_from_drawdown(drawdown_pct: f64) -> KillSwitchTier {
    let soft: f64 = FleetLimits::DRAWDOWN_SOFT_PCT.to_string().parse().unwrap_or(15.0);
    let emergency: f64 = FleetLimits::DRAWDOWN_EMERGENCY_PCT.to_string().parse().unwrap_or(25.0);
    if drawdown_pct >= emergency {
        KillSwitchTier::Emergency
    } else if drawdown_pct >= soft {
        KillSwitchTier::Hard
    } else {
        let warning: f64 = FleetLimits::DRAWDOWN_WARNING_PCT.to_string().parse().unwrap_or(10.0);
        if drawdown_pct >= warning { KillSwitchTier::Soft } else { KillSwitchTier::Normal }
    }
}

/// Shared, lock-protected fleet state plus the position book it derives
/// exposure from. One instance per process, cloned into whichever worker
/// owns the assessment timer.
#[derive(Clone)]
pub struct FleetEngine {
    state: Arc<RwLock<FleetRiskState>>,
    positions: PositionBook,
}

impl FleetEngine {
    pub fn new(starting_equity: Decimal, positions: PositionBook) -> Self {
        Self { state: Arc::new(RwLock::new(FleetRiskState::new_normal(starting_equity))), positions }
    }

    pub fn snapshot(&self) -> FleetRiskState {
        self.state.read().clone()
    }

    /// §4.4 invariant: `canOpenPosition` reads the tier without a lock on the
    /// broader risk path — a plain `RwLock::read` here is as atomic as this
    /// check needs to be, and cheap enough to call on every order attempt.
    pub fn can_open_new_positions(&self) -> bool {
        matches!(self.state.read().tier, KillSwitchTier::Normal)
    }

    /// Run one assessment cycle: recompute exposure and reassign tier.
    /// §4.4.6: this cycle only ever *escalates* — the new tier is never
    /// below whatever tier the fleet already sat at. Downward movement is
    /// exclusively `try_self_heal`'s job, one step at a time. Returns the
    /// action the caller must now enact.
    pub fn assess_cycle(&self, current_equity: Decimal, audit: &AuditLog) -> TierAction {
        let exposure = aggregate_exposure(&self.positions);

        let mut state = self.state.write();
        if current_equity > state.peak_equity {
            state.peak_equity = current_equity;
        }
        state.current_equity = current_equity;
        state.drawdown_pct = if state.peak_equity.is_zero() {
            0.0
        } else {
            ((state.peak_equity - current_equity) / state.peak_equity * Decimal::from(100)).to_string().parse().unwrap_or(0.0)
        };

        let violations = detect_violations(&exposure, state.drawdown_pct);
        let drawdown_tier = tier_from_drawdown(state.drawdown_pct);
        let hard_violation = violations.iter().any(|v| v.contains("exceeds") || v.contains("EMERGENCY"));
        let previous_tier = state.tier;
        let mut new_tier = drawdown_tier.max(previous_tier);
        if hard_violation {
            new_tier = new_tier.max(KillSwitchTier::Hard);
        }

        let violations_empty = violations.is_empty();
        state.exposure = exposure;
        state.active_violations = violations;
        state.self_healing = new_tier != KillSwitchTier::Normal && state.drawdown_pct <= recovery_threshold_pct() && violations_empty;

        if new_tier != previous_tier {
            state.tier = new_tier;
            state.tier_entered_at = chrono::Utc::now();
            drop(state);

            audit.append(for_entity(
                event_types::FLEET_TIER_CHANGED,
                "fleet",
                uuid::Uuid::nil(),
                "system",
                "fleet_engine",
                json!({"from": format!("{previous_tier:?}"), "to": format!("{new_tier:?}")}),
            ));
            warn!(?previous_tier, ?new_tier, "fleet tier escalated");
        }

        action_for_tier(new_tier)
    }

    /// Self-healing: checked every cycle per §4.4.6 — if the current tier is
    /// above NORMAL, drawdown has recovered to within `SELF_HEAL_RECOVERY_PCT`,
    /// and no violations are active, step exactly one tier toward NORMAL.
    /// Each step is its own audit event so the recovery path is as visible
    /// as the escalation path; a multi-tier recovery takes multiple cycles.
    pub fn try_self_heal(&self, audit: &AuditLog) -> bool {
        let mut state = self.state.write();
        if state.tier == KillSwitchTier::Normal {
            return false;
        }
        if state.drawdown_pct > recovery_threshold_pct() || !state.active_violations.is_empty() {
            return false;
        }
        let from = state.tier;
        let to = from.step_down();
        state.tier = to;
        state.tier_entered_at = chrono::Utc::now();
        state.self_healing = to != KillSwitchTier::Normal;
        drop(state);

        audit.append(for_entity(
            event_types::FLEET_SELF_HEAL,
            "fleet",
            uuid::Uuid::nil(),
            "system",
            "fleet_engine",
            json!({"from": format!("{from:?}"), "to": format!("{to:?}")}),
        ));
        info!(?from, ?to, "fleet self-healed one tier");
        true
    }

    /// §4.4.2: on EMERGENCY, dispatch one exit-intent order per open
    /// position through the broker adapter. Each dispatch (success or
    /// failure) is its own audit event; a single broker failure does not
    /// stop the sweep over the remaining positions.
    pub async fn dispatch_emergency_exit(&self, broker: &dyn BrokerAdapter, audit: &AuditLog) -> usize {
        if self.state.read().tier != KillSwitchTier::Emergency {
            return 0;
        }
        let open = self.positions.all();
        let mut dispatched = 0;
        for position in open {
            let outcome = broker.submit_exit_order(&position).await;
            match outcome {
                Ok(report) => {
                    dispatched += 1;
                    audit.append(for_entity(
                        event_types::FLEET_EXIT_DISPATCHED,
                        "bot",
                        position.bot_id,
                        "system",
                        "fleet_engine",
                        json!({"symbol": position.symbol, "quantity": position.quantity, "order_id": report.order_id}),
                    ));
                }
                Err(e) => {
                    error!(bot_id = %position.bot_id, symbol = %position.symbol, error = %e, "emergency exit dispatch failed");
                    audit.append(for_entity(
                        event_types::FLEET_EXIT_DISPATCHED,
                        "bot",
                        position.bot_id,
                        "system",
                        "fleet_engine",
                        json!({"symbol": position.symbol, "quantity": position.quantity, "error": e.to_string()}),
                    ));
                }
            }
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::positions::OpenPosition;
    use crate::types::Side;

    fn position(symbol: &str, qty: u32, notional: Decimal) -> OpenPosition {
        OpenPosition {
            bot_id: uuid::Uuid::new_v4(),
            symbol: symbol.to_string(),
            sector: "INDEX".to_string(),
            stage: Stage::Live,
            side: Side::Long,
            quantity: qty,
            entry_price: dec!(100),
            notional,
        }
    }

    #[test]
    fn drawdown_past_emergency_sets_emergency_tier() {
        let positions = PositionBook::new();
        let engine = FleetEngine::new(dec!(100_000), positions);
        let audit = AuditLog::new();

        engine.assess_cycle(dec!(100_000), &audit);
        assert_eq!(engine.snapshot().tier, KillSwitchTier::Normal);

        engine.assess_cycle(dec!(74_000), &audit);
        assert_eq!(engine.snapshot().tier, KillSwitchTier::Emergency);
        assert!(!engine.can_open_new_positions());
    }

    #[test]
    fn fleet_notional_breach_forces_at_least_hard() {
        let positions = PositionBook::new();
        positions.open(position("MES", 10, dec!(600_000)));
        let engine = FleetEngine::new(dec!(100_000), positions);
        let audit = AuditLog::new();

        engine.assess_cycle(dec!(100_000), &audit);
        assert_eq!(engine.snapshot().tier, KillSwitchTier::Hard);
    }

    #[test]
    fn self_heal_steps_down_one_tier_at_a_time() {
        let positions = PositionBook::new();
        let engine = FleetEngine::new(dec!(100_000), positions);
        let audit = AuditLog::new();

        engine.assess_cycle(dec!(74_000), &audit);
        assert_eq!(engine.snapshot().tier, KillSwitchTier::Emergency);

        engine.assess_cycle(dec!(99_000), &audit);
        assert!(engine.try_self_heal(&audit));
        assert_eq!(engine.snapshot().tier, KillSwitchTier::Hard);
    }

    #[test]
    fn concentration_in_one_symbol_trips_violation() {
        let positions = PositionBook::new();
        for _ in 0..5 {
            positions.open(position(&uuid::Uuid::new_v4().to_string()[..8], 1, dec!(1000)));
        }
        positions.open(position("MES", 50, dec!(1000)));
        let exposure = aggregate_exposure(&positions);
        assert!(exposure.concentration_hhi > 0.5);
    }
}
