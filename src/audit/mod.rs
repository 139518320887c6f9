// =============================================================================
// Immutable Audit Substrate — hash-chained event log, §4.5
// =============================================================================
//
// Every decision the platform makes (stage transitions, governance actions,
// risk-tier changes, config mutations) is appended here as one
// `ImmutableAuditEntry`. Appends are serialized through a single mutex so the
// `sequenceNumber`/`chainHash` invariants (§8 invariant 1) hold under
// concurrent writers from every other module — matching the fleet engine's
// own single-task-owns-the-state discipline in §4.4.
// =============================================================================

pub mod idempotency;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error};
use uuid::Uuid;

/// Well-known event-type tags. Not an exhaustive enum — new event types are
/// just new strings — but these are the ones other modules in this crate
/// emit and query by name.
pub mod event_types {
    pub const PROMOTED: &str = "PROMOTED";
    pub const DEMOTED: &str = "DEMOTED";
    pub const KILLED: &str = "KILLED";
    pub const GOVERNANCE_REQUESTED: &str = "GOVERNANCE_REQUESTED";
    pub const GOVERNANCE_APPROVED: &str = "GOVERNANCE_APPROVED";
    pub const GOVERNANCE_REJECTED: &str = "GOVERNANCE_REJECTED";
    pub const GOVERNANCE_EXPIRED: &str = "GOVERNANCE_EXPIRED";
    pub const GOVERNANCE_WITHDRAWN: &str = "GOVERNANCE_WITHDRAWN";
    pub const CONFIG_SNAPSHOT_BOT: &str = "CONFIG_SNAPSHOT_BOT";
    pub const CONFIG_SNAPSHOT_FLEET: &str = "CONFIG_SNAPSHOT_FLEET";
    pub const CONFIG_CHANGED: &str = "CONFIG_CHANGED";
    pub const RISK_OVERRIDE: &str = "RISK_OVERRIDE";
    pub const RISK_OVERRIDE_REVOKED: &str = "RISK_OVERRIDE_REVOKED";
    pub const FLEET_TIER_CHANGED: &str = "FLEET_TIER_CHANGED";
    pub const FLEET_SELF_HEAL: &str = "FLEET_SELF_HEAL";
    pub const FLEET_EXIT_DISPATCHED: &str = "FLEET_EXIT_DISPATCHED";
    pub const BLOWN_ACCOUNT: &str = "BLOWN_ACCOUNT";
    pub const BACKTEST_COMPLETED: &str = "BACKTEST_COMPLETED";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmutableAuditEntry {
    pub sequence_number: u64,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_type: String,
    pub actor_id: String,
    pub event_payload: serde_json::Value,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub payload_hash: String,
    pub previous_hash: Option<String>,
    pub chain_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller supplies for one append; the chain fields (`sequence_number`,
/// `payload_hash`, `previous_hash`, `chain_hash`) are computed by `AuditLog::append`.
pub struct AppendRequest {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_type: String,
    pub actor_id: String,
    pub event_payload: serde_json::Value,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
}

fn canonical_hash(value: &serde_json::Value) -> String {
    // `serde_json::Value` serializes maps in a deterministic key order for
    // values built from `serde_json::to_value` of a struct (insertion order
    // of declared fields), which is sufficient determinism for our own
    // writers; external callers must pass pre-sorted maps if they need
    // cross-process chain verification against a different serializer.
    let canonical = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

fn chain_hash(seq: u64, payload_hash: &str, previous_hash: Option<&str>) -> String {
    let prior = previous_hash.unwrap_or("GENESIS");
    let mut hasher = Sha256::new();
    hasher.update(format!("{seq}:{payload_hash}:{prior}").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
pub struct BrokenChain {
    pub at_sequence: u64,
    pub reason: String,
}

/// The append-only, hash-chained log. Entries live in a plain `Vec` behind a
/// single mutex — appends are the only mutation and must be serialized to
/// keep `sequence_number` gap-free, so a stronger concurrency primitive would
/// buy nothing here.
pub struct AuditLog {
    entries: Mutex<Vec<ImmutableAuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub fn append(&self, req: AppendRequest) -> ImmutableAuditEntry {
        let mut entries = self.entries.lock();
        let sequence_number = entries.last().map(|e| e.sequence_number + 1).unwrap_or(1);
        let previous_hash = entries.last().map(|e| e.chain_hash.clone());
        let payload_hash = canonical_hash(&req.event_payload);
        let chain = chain_hash(sequence_number, &payload_hash, previous_hash.as_deref());

        let entry = ImmutableAuditEntry {
            sequence_number,
            event_type: req.event_type,
            entity_type: req.entity_type,
            entity_id: req.entity_id,
            actor_type: req.actor_type,
            actor_id: req.actor_id,
            event_payload: req.event_payload,
            previous_state: req.previous_state,
            new_state: req.new_state,
            payload_hash,
            previous_hash,
            chain_hash: chain,
            created_at: Utc::now(),
        };

        debug!(seq = entry.sequence_number, event_type = %entry.event_type, entity_id = %entry.entity_id, "audit entry appended");
        entries.push(entry.clone());
        entry
    }

    /// §8 invariant 1 / round-trip property: walks the chain in sequence
    /// order, returning the first row whose linkage is broken.
    pub fn verify_hash_chain(&self) -> Result<(), BrokenChain> {
        let entries = self.entries.lock();
        let mut prior: Option<&ImmutableAuditEntry> = None;

        for entry in entries.iter() {
            let expected_previous = prior.map(|p| p.chain_hash.clone());
            if entry.previous_hash != expected_previous {
                error!(seq = entry.sequence_number, "audit chain linkage broken");
                return Err(BrokenChain {
                    at_sequence: entry.sequence_number,
                    reason: "previous_hash does not match prior entry's chain_hash".to_string(),
                });
            }
            let expected_chain = chain_hash(entry.sequence_number, &entry.payload_hash, entry.previous_hash.as_deref());
            if entry.chain_hash != expected_chain {
                error!(seq = entry.sequence_number, "audit chain_hash mismatch");
                return Err(BrokenChain { at_sequence: entry.sequence_number, reason: "chain_hash recomputation mismatch".to_string() });
            }
            prior = Some(entry);
        }
        Ok(())
    }

    /// §4.5.1: all entries for one entity, in sequence order.
    pub fn entries_for_entity(&self, entity_type: &str, entity_id: &str) -> Vec<ImmutableAuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect()
    }

    /// §4.5.1: the most recent `CONFIG_SNAPSHOT_*` event for this entity,
    /// scanning in reverse sequence order. There is no separate snapshot
    /// store — retrieval always goes through the hash-chained rows.
    pub fn latest_snapshot_for(&self, entity_type: &str, entity_id: &str) -> Option<ImmutableAuditEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|e| {
                e.entity_type == entity_type
                    && e.entity_id == entity_id
                    && e.event_type.starts_with("CONFIG_SNAPSHOT_")
            })
            .cloned()
    }

    /// §4.5: derived view — `RISK_OVERRIDE` events whose `expiresAt` (read
    /// from the payload) is still in the future and whose id does not appear
    /// in any `RISK_OVERRIDE_REVOKED` event.
    pub fn active_risk_overrides(&self, now: DateTime<Utc>) -> Vec<ImmutableAuditEntry> {
        let entries = self.entries.lock();
        let revoked: std::collections::HashSet<String> = entries
            .iter()
            .filter(|e| e.event_type == event_types::RISK_OVERRIDE_REVOKED)
            .filter_map(|e| e.event_payload.get("override_id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();

        entries
            .iter()
            .filter(|e| e.event_type == event_types::RISK_OVERRIDE)
            .filter(|e| {
                let not_revoked = e
                    .event_payload
                    .get("override_id")
                    .and_then(|v| v.as_str())
                    .map(|id| !revoked.contains(id))
                    .unwrap_or(true);
                let not_expired = e
                    .event_payload
                    .get("expires_at")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc) > now)
                    .unwrap_or(false);
                not_revoked && not_expired
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience: build an `AppendRequest` whose `entity_id` is a `Uuid`.
pub fn for_entity(event_type: &str, entity_type: &str, entity_id: Uuid, actor_type: &str, actor_id: &str, payload: serde_json::Value) -> AppendRequest {
    AppendRequest {
        event_type: event_type.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        actor_type: actor_type.to_string(),
        actor_id: actor_id.to_string(),
        event_payload: payload,
        previous_state: None,
        new_state: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_entry_has_no_previous_hash_and_genesis_chain() {
        let log = AuditLog::new();
        let entry = log.append(for_entity(event_types::PROMOTED, "bot", Uuid::new_v4(), "system", "test", json!({"a": 1})));
        assert_eq!(entry.sequence_number, 1);
        assert!(entry.previous_hash.is_none());
        let expected = chain_hash(1, &entry.payload_hash, None);
        assert_eq!(entry.chain_hash, expected);
    }

    #[test]
    fn sequence_numbers_have_no_gaps_and_chain_links() {
        let log = AuditLog::new();
        let bot_id = Uuid::new_v4();
        for i in 0..5 {
            log.append(for_entity(event_types::PROMOTED, "bot", bot_id, "system", "test", json!({"i": i})));
        }
        assert!(log.verify_hash_chain().is_ok());
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn verify_hash_chain_passes_immediately_after_append() {
        let log = AuditLog::new();
        log.append(for_entity(event_types::DEMOTED, "bot", Uuid::new_v4(), "system", "test", json!({})));
        assert!(log.verify_hash_chain().is_ok());
    }

    #[test]
    fn entries_for_entity_filters_by_type_and_id() {
        let log = AuditLog::new();
        let bot_a = Uuid::new_v4();
        let bot_b = Uuid::new_v4();
        log.append(for_entity(event_types::PROMOTED, "bot", bot_a, "system", "t", json!({})));
        log.append(for_entity(event_types::PROMOTED, "bot", bot_b, "system", "t", json!({})));
        assert_eq!(log.entries_for_entity("bot", &bot_a.to_string()).len(), 1);
    }

    #[test]
    fn active_risk_overrides_excludes_revoked_and_expired() {
        let log = AuditLog::new();
        let bot_id = Uuid::new_v4();
        let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();

        log.append(for_entity(event_types::RISK_OVERRIDE, "bot", bot_id, "system", "t", json!({"override_id": "a", "expires_at": future})));
        log.append(for_entity(event_types::RISK_OVERRIDE, "bot", bot_id, "system", "t", json!({"override_id": "b", "expires_at": past})));
        log.append(for_entity(event_types::RISK_OVERRIDE, "bot", bot_id, "system", "t", json!({"override_id": "c", "expires_at": future})));
        log.append(for_entity(event_types::RISK_OVERRIDE_REVOKED, "bot", bot_id, "system", "t", json!({"override_id": "c"})));

        let active = log.active_risk_overrides(Utc::now());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].event_payload["override_id"], "a");
    }
}
