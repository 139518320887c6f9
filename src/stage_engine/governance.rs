// =============================================================================
// Governance — dual-control (maker-checker) approval for CANARY→LIVE, §4.3
// =============================================================================
//
// The one promotion this platform never self-executes. A request files a
// PENDING row with a 24h expiry and a metrics snapshot; a *different* user
// must approve before the promotion actually runs. Every state transition is
// its own audit entry, same as the stage engine proper.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{event_types, for_entity, AuditLog};
use crate::domain::{ApprovalStatus, GovernanceApproval, SessionMetrics};
use crate::stage_engine::BotLifecycleRegistry;
use crate::types::Stage;

const APPROVAL_TTL: Duration = Duration::hours(24);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("a pending governance request already exists for this bot")]
    DuplicatePending,
    #[error("governance request not found")]
    NotFound,
    #[error("dual control violation: approver must differ from requester")]
    DualControlViolation,
    #[error("request is not pending")]
    NotPending,
    #[error("only the original requester may withdraw a request")]
    NotRequester,
}

pub struct GovernanceRegistry {
    approvals: RwLock<HashMap<Uuid, GovernanceApproval>>,
}

impl GovernanceRegistry {
    pub fn new() -> Self {
        Self { approvals: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, id: Uuid) -> Option<GovernanceApproval> {
        self.approvals.read().get(&id).cloned()
    }

    pub fn pending(&self) -> Vec<GovernanceApproval> {
        self.approvals.read().values().filter(|a| a.status == ApprovalStatus::Pending).cloned().collect()
    }

    pub fn history(&self, bot_id: Uuid, limit: usize) -> Vec<GovernanceApproval> {
        let mut rows: Vec<GovernanceApproval> = self.approvals.read().values().filter(|a| a.bot_id == bot_id).cloned().collect();
        rows.sort_by_key(|a| std::cmp::Reverse(a.requested_at));
        rows.truncate(limit);
        rows
    }

    /// File a CANARY→LIVE request. Rejects duplicate PENDING rows per bot.
    pub fn request(
        &self,
        bot_id: Uuid,
        from_stage: Stage,
        to_stage: Stage,
        requested_by: &str,
        justification: &str,
        metrics_snapshot: SessionMetrics,
        audit: &AuditLog,
    ) -> Result<Uuid, GovernanceError> {
        let mut approvals = self.approvals.write();
        if approvals.values().any(|a| a.bot_id == bot_id && a.status == ApprovalStatus::Pending) {
            return Err(GovernanceError::DuplicatePending);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let approval = GovernanceApproval {
            id,
            bot_id,
            requested_action: "PROMOTE".to_string(),
            from_stage,
            to_stage,
            requested_by: requested_by.to_string(),
            reviewed_by: None,
            status: ApprovalStatus::Pending,
            justification: justification.to_string(),
            review_notes: None,
            requested_at: now,
            expires_at: now + APPROVAL_TTL,
            metrics_snapshot,
        };
        approvals.insert(id, approval);
        drop(approvals);

        audit.append(for_entity(
            event_types::GOVERNANCE_REQUESTED,
            "governance_approval",
            id,
            "user",
            requested_by,
            json!({"bot_id": bot_id.to_string(), "from_stage": from_stage.to_string(), "to_stage": to_stage.to_string()}),
        ));
        info!(bot_id = %bot_id, approval_id = %id, requested_by, "governance request filed");
        Ok(id)
    }

    /// Approve a pending request and atomically execute the promotion.
    /// Approver must differ from requester (§8 invariant 3). If the stage
    /// execution itself fails, the approval row reverts to PENDING with the
    /// error recorded so it can be re-approved.
    pub fn approve(
        &self,
        id: Uuid,
        approver_id: &str,
        bots: &BotLifecycleRegistry,
        audit: &AuditLog,
    ) -> Result<(), GovernanceError> {
        let (bot_id, to_stage, requested_by) = {
            let approvals = self.approvals.read();
            let approval = approvals.get(&id).ok_or(GovernanceError::NotFound)?;
            if approval.status != ApprovalStatus::Pending {
                return Err(GovernanceError::NotPending);
            }
            if approval.requested_by == approver_id {
                warn!(approval_id = %id, approver_id, "dual control violation: approver == requester");
                return Err(GovernanceError::DualControlViolation);
            }
            (approval.bot_id, approval.to_stage, approval.requested_by.clone())
        };

        match bots.execute_stage_change(bot_id, to_stage, audit) {
            Some(_) => {
                let mut approvals = self.approvals.write();
                if let Some(approval) = approvals.get_mut(&id) {
                    approval.status = ApprovalStatus::Approved;
                    approval.reviewed_by = Some(approver_id.to_string());
                }
                drop(approvals);
                audit.append(for_entity(
                    event_types::GOVERNANCE_APPROVED,
                    "governance_approval",
                    id,
                    "user",
                    approver_id,
                    json!({"bot_id": bot_id.to_string(), "requested_by": requested_by}),
                ));
                info!(approval_id = %id, approver_id, "governance request approved and promotion executed");
                Ok(())
            }
            None => {
                let mut approvals = self.approvals.write();
                if let Some(approval) = approvals.get_mut(&id) {
                    approval.status = ApprovalStatus::Pending;
                    approval.review_notes = Some("promotion execution failed; bot not found, re-approval possible".to_string());
                }
                warn!(approval_id = %id, "promotion execution failed, approval reverted to PENDING");
                Err(GovernanceError::NotFound)
            }
        }
    }

    pub fn reject(&self, id: Uuid, rejecter_id: &str, reason: &str, audit: &AuditLog) -> Result<(), GovernanceError> {
        let mut approvals = self.approvals.write();
        let approval = approvals.get_mut(&id).ok_or(GovernanceError::NotFound)?;
        if approval.status != ApprovalStatus::Pending {
            return Err(GovernanceError::NotPending);
        }
        approval.status = ApprovalStatus::Rejected;
        approval.reviewed_by = Some(rejecter_id.to_string());
        approval.review_notes = Some(reason.to_string());
        let bot_id = approval.bot_id;
        drop(approvals);

        audit.append(for_entity(
            event_types::GOVERNANCE_REJECTED,
            "governance_approval",
            id,
            "user",
            rejecter_id,
            json!({"bot_id": bot_id.to_string(), "reason": reason}),
        ));
        Ok(())
    }

    pub fn withdraw(&self, id: Uuid, user_id: &str, audit: &AuditLog) -> Result<(), GovernanceError> {
        let mut approvals = self.approvals.write();
        let approval = approvals.get_mut(&id).ok_or(GovernanceError::NotFound)?;
        if approval.status != ApprovalStatus::Pending {
            return Err(GovernanceError::NotPending);
        }
        if approval.requested_by != user_id {
            return Err(GovernanceError::NotRequester);
        }
        approval.status = ApprovalStatus::Withdrawn;
        let bot_id = approval.bot_id;
        drop(approvals);

        audit.append(for_entity(event_types::GOVERNANCE_WITHDRAWN, "governance_approval", id, "user", user_id, json!({"bot_id": bot_id.to_string()})));
        Ok(())
    }

    /// Periodic sweeper: mark every PENDING row past `expires_at` as EXPIRED.
    pub fn sweep_expired(&self, now: chrono::DateTime<Utc>, audit: &AuditLog) -> usize {
        let mut expired_ids = Vec::new();
        {
            let mut approvals = self.approvals.write();
            for approval in approvals.values_mut() {
                if approval.status == ApprovalStatus::Pending && approval.expires_at <= now {
                    approval.status = ApprovalStatus::Expired;
                    expired_ids.push(approval.id);
                }
            }
        }
        for id in &expired_ids {
            audit.append(for_entity(event_types::GOVERNANCE_EXPIRED, "governance_approval", *id, "system", "governance_sweeper", json!({})));
        }
        if !expired_ids.is_empty() {
            info!(count = expired_ids.len(), "governance sweeper expired pending requests");
        }
        expired_ids.len()
    }
}

impl Default for GovernanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience alias used by `AppState`; governance needs no state beyond
/// its own registry plus the shared bot registry and audit log passed in per
/// call, so no extra `Arc` wrapper type is needed beyond the registry itself.
pub type SharedGovernance = Arc<GovernanceRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskConfig;
    use crate::types::SessionMode;
    use std::collections::HashMap as Map;

    fn canary_bot() -> crate::domain::Bot {
        crate::domain::Bot {
            id: Uuid::new_v4(),
            name: "Canary Bot".to_string(),
            stage: Stage::Canary,
            symbol: "MES".to_string(),
            archetype_id: Some("breakout".to_string()),
            strategy_config: Map::new(),
            risk_config: RiskConfig { stop_loss_ticks: 20, max_position_size: 1 },
            session_mode: SessionMode::RthUs,
            current_generation_id: Uuid::new_v4(),
            stage_locked_until: None,
            peak_equity: rust_decimal::Decimal::ZERO,
            manual_promotion_mode: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn same_user_cannot_approve_own_request() {
        let gov = GovernanceRegistry::new();
        let bots = BotLifecycleRegistry::new();
        let audit = AuditLog::new();
        let b = canary_bot();
        let bot_id = b.id;
        bots.insert(b);

        let id = gov.request(bot_id, Stage::Canary, Stage::Live, "u1", "ready", SessionMetrics::default(), &audit).unwrap();
        assert_eq!(gov.approve(id, "u1", &bots, &audit), Err(GovernanceError::DualControlViolation));
    }

    #[test]
    fn different_user_approval_executes_promotion() {
        let gov = GovernanceRegistry::new();
        let bots = BotLifecycleRegistry::new();
        let audit = AuditLog::new();
        let b = canary_bot();
        let bot_id = b.id;
        bots.insert(b);

        let id = gov.request(bot_id, Stage::Canary, Stage::Live, "u1", "ready", SessionMetrics::default(), &audit).unwrap();
        gov.approve(id, "u2", &bots, &audit).unwrap();

        assert_eq!(bots.get(bot_id).unwrap().stage, Stage::Live);
        assert_eq!(gov.get(id).unwrap().status, ApprovalStatus::Approved);
        assert!(audit.verify_hash_chain().is_ok());
    }

    #[test]
    fn duplicate_pending_request_is_rejected() {
        let gov = GovernanceRegistry::new();
        let audit = AuditLog::new();
        let bot_id = Uuid::new_v4();
        gov.request(bot_id, Stage::Canary, Stage::Live, "u1", "a", SessionMetrics::default(), &audit).unwrap();
        let second = gov.request(bot_id, Stage::Canary, Stage::Live, "u1", "b", SessionMetrics::default(), &audit);
        assert_eq!(second, Err(GovernanceError::DuplicatePending));
    }

    #[test]
    fn sweep_expires_only_past_due_pending_rows() {
        let gov = GovernanceRegistry::new();
        let audit = AuditLog::new();
        let bot_id = Uuid::new_v4();
        let id = gov.request(bot_id, Stage::Canary, Stage::Live, "u1", "a", SessionMetrics::default(), &audit).unwrap();

        let not_yet = Utc::now() + Duration::hours(1);
        assert_eq!(gov.sweep_expired(not_yet, &audit), 0);

        let past_expiry = Utc::now() + Duration::hours(25);
        assert_eq!(gov.sweep_expired(past_expiry, &audit), 1);
        assert_eq!(gov.get(id).unwrap().status, ApprovalStatus::Expired);
    }
}
