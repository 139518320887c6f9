// =============================================================================
// Shared Bar Cache — distributed, stampede-protected historical data layer
// =============================================================================
//
// Given `(symbol, timeframe, sessionMode, startTs, endTs)`, returns an
// ordered sequence of bars, fetching from the real provider at most once
// across all concurrent callers on any worker (§4.1).
//
// The protocol is store-agnostic: `BarCacheStore` (store.rs) abstracts the
// get/set-if-absent/delete primitives a cache round-trip needs, so the same
// stampede logic below runs whether the backing store is the in-process
// `MemoryStore` or a real `RedisStore` shared across workers.
// =============================================================================

pub mod compression;
pub mod provider;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use md5::{Digest as Md5Digest, Md5};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{SessionMode, Timeframe};
use provider::BarProvider;
use store::BarCacheStore;

// =============================================================================
// Bar
// =============================================================================

/// One OHLCV bar in its semantic, trading-ready representation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// The compact wire representation used for cache storage: a plain numeric
/// tuple `[ts, o, h, l, c, v]`, far smaller once gzipped than a JSON object
/// per bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactBar(pub i64, pub f64, pub f64, pub f64, pub f64, pub f64);

impl From<&Bar> for CompactBar {
    fn from(b: &Bar) -> Self {
        CompactBar(
            b.ts.timestamp(),
            dec_to_f64(b.open),
            dec_to_f64(b.high),
            dec_to_f64(b.low),
            dec_to_f64(b.close),
            dec_to_f64(b.volume),
        )
    }
}

impl From<CompactBar> for Bar {
    fn from(c: CompactBar) -> Self {
        Bar {
            ts: DateTime::from_timestamp(c.0, 0).unwrap_or_else(Utc::now),
            open: f64_to_dec(c.1),
            high: f64_to_dec(c.2),
            low: f64_to_dec(c.3),
            close: f64_to_dec(c.4),
            volume: f64_to_dec(c.5),
        }
    }
}

fn dec_to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

fn f64_to_dec(f: f64) -> Decimal {
    Decimal::try_from(f).unwrap_or_default()
}

// =============================================================================
// Cache key
// =============================================================================

/// A fully-resolved request for a bar range.
#[derive(Debug, Clone)]
pub struct BarRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub session_mode: SessionMode,
    pub start_ts: i64,
    pub end_ts: i64,
    pub trace_id: String,
}

/// Build the canonical cache key: `bars:v2:{SYMBOL}:{TF}:{SESSION}:{start}:{end}`,
/// collapsing the range portion to `h{md5-16hex}` once it would otherwise
/// exceed 100 bytes (a safety valve for stores with key-length limits).
pub fn cache_key(req: &BarRequest) -> String {
    let range = format!("{}:{}", req.start_ts, req.end_ts);
    let range = if range.len() > 100 {
        let mut hasher = Md5::new();
        hasher.update(range.as_bytes());
        let digest = hasher.finalize();
        format!("h{}", hex::encode(&digest[..8]))
    } else {
        range
    };
    format!(
        "bars:v2:{}:{}:{}:{}",
        req.symbol.to_uppercase(),
        req.timeframe.as_str(),
        session_tag(req.session_mode),
        range
    )
}

fn session_tag(mode: SessionMode) -> &'static str {
    match mode {
        SessionMode::RthUs => "RTH_US",
        SessionMode::Eth => "ETH",
        SessionMode::Full24x5 => "FULL_24x5",
        SessionMode::Custom => "CUSTOM",
    }
}

fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

fn pending_key(key: &str) -> String {
    format!("pending:{key}")
}

const LOCK_TTL: Duration = Duration::from_secs(120);
const PENDING_TTL: Duration = Duration::from_secs(180);
const DATA_TTL: Duration = Duration::from_secs(12 * 3600);
const RENEWAL_INTERVAL: Duration = Duration::from_secs(30);
const WAIT_GRACE_PERIOD: Duration = Duration::from_secs(10);
const WAIT_POLL_START: Duration = Duration::from_secs(1);
const WAIT_POLL_STEP: Duration = Duration::from_millis(200);
const WAIT_POLL_MAX: Duration = Duration::from_secs(5);
const DEAD_HOLDER_STREAK: u32 = 5;

// =============================================================================
// Counters
// =============================================================================

/// Stampede-protection counters, §4.1. Each field is a lock-free atomic so
/// any number of concurrent `fetch` calls can bump them without contending.
#[derive(Default)]
pub struct CacheCounters {
    pub cache_hit: AtomicU64,
    pub cache_miss: AtomicU64,
    pub cache_set: AtomicU64,
    pub bytes: AtomicU64,
    pub lock_waits: AtomicU64,
    pub provider_fetch: AtomicU64,
    pub stampede_prevented: AtomicU64,
    pub stampede_fallback: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheCountersSnapshot {
    pub cache_hit: u64,
    pub cache_miss: u64,
    pub cache_set: u64,
    pub bytes: u64,
    pub lock_waits: u64,
    pub provider_fetch: u64,
    pub stampede_prevented: u64,
    pub stampede_fallback: u64,
}

impl CacheCounters {
    pub fn snapshot(&self) -> CacheCountersSnapshot {
        CacheCountersSnapshot {
            cache_hit: self.cache_hit.load(Ordering::Relaxed),
            cache_miss: self.cache_miss.load(Ordering::Relaxed),
            cache_set: self.cache_set.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            provider_fetch: self.provider_fetch.load(Ordering::Relaxed),
            stampede_prevented: self.stampede_prevented.load(Ordering::Relaxed),
            stampede_fallback: self.stampede_fallback.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one `BarCache::fetch` call, for callers (e.g. the backtest
/// executor) that want to log or assert on how the bars were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchPath {
    CacheHit,
    BuiltByUs,
    StampedePrevented,
    StampedeFallback,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub bars: Vec<Bar>,
    pub path: FetchPath,
}

// =============================================================================
// BarCache
// =============================================================================

pub struct BarCache {
    store: Arc<dyn BarCacheStore>,
    provider: Arc<dyn BarProvider>,
    pub counters: CacheCounters,
    instance_id: String,
}

impl BarCache {
    pub fn new(store: Arc<dyn BarCacheStore>, provider: Arc<dyn BarProvider>) -> Self {
        Self {
            store,
            provider,
            counters: CacheCounters::default(),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Run the full stampede-protected fetch protocol for one request.
    /// Always returns bars or an error — never partial data, per §4.1's
    /// failure policy.
    pub async fn fetch(&self, req: &BarRequest) -> anyhow::Result<FetchOutcome> {
        let key = cache_key(req);

        // Step 1: cache hit.
        match self.store.get(&key).await {
            Ok(Some(encoded)) => {
                self.counters.cache_hit.fetch_add(1, Ordering::Relaxed);
                match compression::decode(&encoded) {
                    Ok(bars) => {
                        debug!(key = %key, bars = bars.len(), "bar cache hit");
                        return Ok(FetchOutcome { bars, path: FetchPath::CacheHit });
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "cache payload corrupt, falling back to provider");
                    }
                }
            }
            Ok(None) => {
                self.counters.cache_miss.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, falling back to provider");
                return self.provider_fetch_direct(req).await;
            }
        }

        // Step 2: try to acquire the exclusive build lock.
        let lock_val = format!("{}:{}", self.instance_id, req.trace_id);
        let acquired = match self.store.set_nx(&lock_key(&key), &lock_val, LOCK_TTL).await {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "lock acquisition failed, falling back to provider");
                return self.provider_fetch_direct(req).await;
            }
        };

        if acquired {
            return self.build_and_publish(req, &key, &lock_val).await;
        }

        // Step 3: someone else holds the lock — wait.
        self.wait_for_holder(req, &key).await
    }

    async fn build_and_publish(&self, req: &BarRequest, key: &str, lock_val: &str) -> anyhow::Result<FetchOutcome> {
        if let Err(e) = self.store.set(&pending_key(key), lock_val, PENDING_TTL).await {
            warn!(key = %key, error = %e, "failed to set pending sentinel");
        }

        let renewal_handle = {
            let store = self.store.clone();
            let key = key.to_string();
            let lock_val = lock_val.to_string();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(RENEWAL_INTERVAL).await;
                    let _ = store.set(&lock_key(&key), &lock_val, LOCK_TTL).await;
                    let _ = store.set(&pending_key(&key), &lock_val, PENDING_TTL).await;
                }
            })
        };

        let result = self.provider.fetch(req).await;
        renewal_handle.abort();

        let bars = match result {
            Ok(bars) => bars,
            Err(e) => {
                let _ = self.store.del(&lock_key(key)).await;
                let _ = self.store.del(&pending_key(key)).await;
                return Err(e);
            }
        };

        self.counters.provider_fetch.fetch_add(1, Ordering::Relaxed);

        let compact: Vec<CompactBar> = bars.iter().map(CompactBar::from).collect();
        let encoded = compression::encode(&compact)?;
        self.counters.bytes.fetch_add(encoded.len() as u64, Ordering::Relaxed);

        if let Err(e) = self.store.set(key, &encoded, DATA_TTL).await {
            warn!(key = %key, error = %e, "failed to write bar cache entry");
        } else {
            self.counters.cache_set.fetch_add(1, Ordering::Relaxed);
        }

        let _ = self.store.del(&lock_key(key)).await;
        let _ = self.store.del(&pending_key(key)).await;

        info!(key = %key, bars = bars.len(), "bar cache populated from provider");
        Ok(FetchOutcome { bars, path: FetchPath::BuiltByUs })
    }

    async fn wait_for_holder(&self, req: &BarRequest, key: &str) -> anyhow::Result<FetchOutcome> {
        let mut poll_interval = WAIT_POLL_START;
        let started = tokio::time::Instant::now();
        let mut dead_holder_streak = 0u32;

        loop {
            self.counters.lock_waits.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(poll_interval).await;
            poll_interval = (poll_interval + WAIT_POLL_STEP).min(WAIT_POLL_MAX);

            if let Ok(Some(encoded)) = self.store.get(key).await {
                if let Ok(bars) = compression::decode(&encoded) {
                    self.counters.cache_hit.fetch_add(1, Ordering::Relaxed);
                    self.counters.stampede_prevented.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "stampede prevented, resolved via holder's cache write");
                    return Ok(FetchOutcome { bars, path: FetchPath::StampedePrevented });
                }
            }

            if started.elapsed() < WAIT_GRACE_PERIOD {
                continue;
            }

            let pending_alive = matches!(self.store.exists(&pending_key(key)).await, Ok(true));
            if pending_alive {
                dead_holder_streak = 0;
                continue;
            }

            dead_holder_streak += 1;
            if dead_holder_streak < DEAD_HOLDER_STREAK {
                continue;
            }

            // Holder presumed dead: one final cache read, else fall through
            // to a direct provider fetch.
            if let Ok(Some(encoded)) = self.store.get(key).await {
                if let Ok(bars) = compression::decode(&encoded) {
                    self.counters.cache_hit.fetch_add(1, Ordering::Relaxed);
                    return Ok(FetchOutcome { bars, path: FetchPath::StampedePrevented });
                }
            }

            warn!(key = %key, "lock holder presumed dead, falling back to direct provider fetch");
            self.counters.stampede_fallback.fetch_add(1, Ordering::Relaxed);
            return self.provider_fetch_direct(req).await;
        }
    }

    async fn provider_fetch_direct(&self, req: &BarRequest) -> anyhow::Result<FetchOutcome> {
        self.counters.provider_fetch.fetch_add(1, Ordering::Relaxed);
        let bars = self.provider.fetch(req).await?;
        Ok(FetchOutcome { bars, path: FetchPath::StampedeFallback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar_cache::provider::SimulatedProvider;
    use crate::bar_cache::store::MemoryStore;

    fn req() -> BarRequest {
        BarRequest {
            symbol: "MES".to_string(),
            timeframe: Timeframe::M5,
            session_mode: SessionMode::RthUs,
            start_ts: 1_700_000_000,
            end_ts: 1_700_100_000,
            trace_id: "t1".to_string(),
        }
    }

    #[test]
    fn key_is_canonical_and_stable() {
        let r = req();
        let k1 = cache_key(&r);
        let k2 = cache_key(&r);
        assert_eq!(k1, k2);
        assert!(k1.starts_with("bars:v2:MES:5m:RTH_US:"));
    }

    #[test]
    fn long_ranges_collapse_to_md5_digest() {
        let mut r = req();
        r.end_ts = r.start_ts + 999_999_999_999;
        let k = cache_key(&r);
        assert!(k.contains(":h"));
        assert!(k.len() < 150);
    }

    #[tokio::test]
    async fn cold_key_builds_then_subsequent_call_hits_cache() {
        let store: Arc<dyn BarCacheStore> = Arc::new(MemoryStore::new());
        let provider: Arc<dyn BarProvider> = Arc::new(SimulatedProvider::new());
        let cache = BarCache::new(store, provider);
        let r = req();

        let first = cache.fetch(&r).await.unwrap();
        assert_eq!(first.path, FetchPath::BuiltByUs);
        assert!(!first.bars.is_empty());

        let second = cache.fetch(&r).await.unwrap();
        assert_eq!(second.path, FetchPath::CacheHit);
        assert_eq!(second.bars.len(), first.bars.len());
    }

    #[tokio::test]
    async fn concurrent_cold_fetches_hit_provider_once() {
        let store: Arc<dyn BarCacheStore> = Arc::new(MemoryStore::new());
        let provider: Arc<dyn BarProvider> = Arc::new(SimulatedProvider::new());
        let cache = Arc::new(BarCache::new(store, provider));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let r = req();
            handles.push(tokio::spawn(async move { cache.fetch(&r).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snap = cache.counters.snapshot();
        assert_eq!(snap.provider_fetch, 1, "exactly one provider fetch across all concurrent callers");
    }
}
