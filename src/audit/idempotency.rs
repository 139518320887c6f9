// =============================================================================
// Idempotency middleware — exactly-once mutation semantics, §4.5
// =============================================================================
//
// Mutation requests carrying an `Idempotency-Key` are deduplicated here. The
// store is a bounded, TTL'd map behind a single `RwLock`, matching the
// teacher's `app_state` convention for small shared in-process registries
// rather than reaching for an external cache for something this short-lived.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::{IdempotencyRecord, IdempotencyStatus};

const TTL_SECONDS: i64 = 24 * 3600;
const MAX_RECORDS: usize = 10_000;
const EVICT_FRACTION: f64 = 0.10;
const MAX_CACHED_RESPONSE_BYTES: usize = 1024 * 1024;

pub fn request_hash(method: &str, path: &str, canonical_body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(canonical_body.as_bytes());
    hex::encode(hasher.finalize())
}

/// What the caller should do with this request, per §4.5's state table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// First time seeing this key: proceed, then call `complete`/`fail`.
    Proceed,
    /// Same key + same hash, still processing: 409, `Retry-After`.
    StillProcessing,
    /// Same key + same hash, already completed: replay the cached response.
    Replay { status_code: u16, body: Option<String> },
    /// Same key, different request body hash: 422 conflict.
    KeyReuseConflict,
}

pub struct IdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    /// Look up `key`; if absent, reserve it in `processing` state and return
    /// `Proceed`. Otherwise compare `request_hash` against the stored one and
    /// resolve per §4.5.
    pub fn begin(&self, key: &str, request_hash: &str) -> IdempotencyOutcome {
        {
            let records = self.records.read();
            if let Some(existing) = records.get(key) {
                if existing.request_hash != request_hash {
                    return IdempotencyOutcome::KeyReuseConflict;
                }
                return match existing.status {
                    IdempotencyStatus::Processing => IdempotencyOutcome::StillProcessing,
                    IdempotencyStatus::Completed => IdempotencyOutcome::Replay {
                        status_code: existing.status_code.unwrap_or(200),
                        body: existing.cached_response.clone(),
                    },
                    // Failed: allow retry — treated as absent below.
                    IdempotencyStatus::Failed => IdempotencyOutcome::Proceed,
                };
            }
        }

        let mut records = self.records.write();
        // Re-check under the write lock: another task may have inserted
        // between our read and this write.
        if let Some(existing) = records.get(key) {
            if existing.status != IdempotencyStatus::Failed {
                drop(records);
                return self.begin(key, request_hash);
            }
        }

        if records.len() >= MAX_RECORDS {
            evict_oldest(&mut records);
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                request_hash: request_hash.to_string(),
                status: IdempotencyStatus::Processing,
                cached_response: None,
                status_code: None,
                created_at: Utc::now(),
            },
        );
        debug!(key, "idempotency record reserved");
        IdempotencyOutcome::Proceed
    }

    /// Record the outcome of executing the request. Responses ≥500 are
    /// marked `failed` (retryable); responses too large to cache are not
    /// half-recorded — the record is dropped entirely so the next `begin`
    /// re-executes instead of replaying an empty cached body.
    pub fn complete(&self, key: &str, status_code: u16, body: Option<String>) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(key) else { return };

        if status_code >= 500 {
            record.status = IdempotencyStatus::Failed;
            record.cached_response = None;
            record.status_code = Some(status_code);
            return;
        }

        let oversized = body.as_ref().map(|b| b.len() > MAX_CACHED_RESPONSE_BYTES).unwrap_or(false);
        if oversized {
            records.remove(key);
            info!(key, status_code, "idempotency response too large to cache, record dropped");
            return;
        }

        record.status = IdempotencyStatus::Completed;
        record.status_code = Some(status_code);
        record.cached_response = body;
        info!(key, status_code, "idempotency record completed");
    }

    /// Drop a failed record so the next `begin` call with the same key
    /// starts fresh.
    pub fn clear_failed(&self, key: &str) {
        let mut records = self.records.write();
        if matches!(records.get(key), Some(r) if r.status == IdempotencyStatus::Failed) {
            records.remove(key);
        }
    }

    /// Hourly sweep: drop records older than the 24h TTL.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| now.signed_duration_since(r.created_at).num_seconds() < TTL_SECONDS);
        let removed = before - records.len();
        if removed > 0 {
            info!(removed, "idempotency cleanup swept expired records");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Evict the oldest 10% of records by insertion time, making room for new
/// reservations once the store hits its 10k cap.
fn evict_oldest(records: &mut HashMap<String, IdempotencyRecord>) {
    let evict_count = ((records.len() as f64) * EVICT_FRACTION).ceil() as usize;
    let mut keys: Vec<(String, DateTime<Utc>)> = records.iter().map(|(k, v)| (k.clone(), v.created_at)).collect();
    keys.sort_by_key(|(_, created_at)| *created_at);
    for (key, _) in keys.into_iter().take(evict_count) {
        records.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_proceeds_then_replays_on_retry() {
        let store = IdempotencyStore::new();
        let hash = request_hash("POST", "/api/bots/create", "{}");

        assert_eq!(store.begin("k1", &hash), IdempotencyOutcome::Proceed);
        store.complete("k1", 201, Some("{\"id\":\"b99\"}".to_string()));

        let replay = store.begin("k1", &hash);
        assert_eq!(
            replay,
            IdempotencyOutcome::Replay { status_code: 201, body: Some("{\"id\":\"b99\"}".to_string()) }
        );
    }

    #[test]
    fn different_body_with_same_key_conflicts() {
        let store = IdempotencyStore::new();
        let hash1 = request_hash("POST", "/api/bots/create", "{\"a\":1}");
        let hash2 = request_hash("POST", "/api/bots/create", "{\"a\":2}");

        store.begin("k1", &hash1);
        store.complete("k1", 201, Some("ok".to_string()));

        assert_eq!(store.begin("k1", &hash2), IdempotencyOutcome::KeyReuseConflict);
    }

    #[test]
    fn still_processing_returns_conflict_marker() {
        let store = IdempotencyStore::new();
        let hash = request_hash("POST", "/x", "{}");
        store.begin("k1", &hash);
        assert_eq!(store.begin("k1", &hash), IdempotencyOutcome::StillProcessing);
    }

    #[test]
    fn failed_record_allows_retry() {
        let store = IdempotencyStore::new();
        let hash = request_hash("POST", "/x", "{}");
        store.begin("k1", &hash);
        store.complete("k1", 500, None);
        assert_eq!(store.begin("k1", &hash), IdempotencyOutcome::Proceed);
    }

    #[test]
    fn cleanup_sweeps_expired_records() {
        let store = IdempotencyStore::new();
        let hash = request_hash("POST", "/x", "{}");
        store.begin("k1", &hash);
        let far_future = Utc::now() + Duration::hours(25);
        assert_eq!(store.cleanup(far_future), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn oversized_response_is_not_cached() {
        let store = IdempotencyStore::new();
        let hash = request_hash("POST", "/x", "{}");
        store.begin("k1", &hash);
        let huge = "a".repeat(MAX_CACHED_RESPONSE_BYTES + 1);
        store.complete("k1", 201, Some(huge));
        assert_eq!(store.len(), 0);
        assert_eq!(store.begin("k1", &hash), IdempotencyOutcome::Proceed);
    }
}
