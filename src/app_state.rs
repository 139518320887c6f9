// =============================================================================
// Central Application State — bot lifecycle platform
// =============================================================================
//
// The single set of `Arc`-shared handles every worker and (eventually) every
// external caller goes through: the bot/generation registry, the audit log,
// the idempotency store, the fleet risk engine, the position book, and the
// regime cache. Generalizes the teacher's `AppState` role — one struct built
// once at process start and cloned/shared, never rebuilt — to a set of
// independently-owned subsystems instead of one dashboard-shaped snapshot,
// since this platform's external surface is a lifecycle API, not a live
// trading dashboard.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::audit::idempotency::IdempotencyStore;
use crate::audit::AuditLog;
use crate::bar_cache::provider::BarProvider;
use crate::bar_cache::store::BarCacheStore;
use crate::bar_cache::BarCache;
use crate::config::RuntimeConfig;
use crate::regime::RegimeCache;
use crate::risk::fleet::FleetEngine;
use crate::risk::positions::PositionBook;
use crate::stage_engine::governance::GovernanceRegistry;
use crate::stage_engine::BotLifecycleRegistry;

/// Default notional used to seed the fleet engine's peak-equity tracking
/// before the first real equity figure is reported by the accounting
/// surface (out of this core's scope); overridable via `RuntimeConfig` in a
/// future revision if a deployment needs a different floor.
const DEFAULT_STARTING_EQUITY: &str = "1000000";

pub struct AppState {
    pub config: RuntimeConfig,
    pub bots: Arc<BotLifecycleRegistry>,
    pub governance: Arc<GovernanceRegistry>,
    pub audit: Arc<AuditLog>,
    pub idempotency: Arc<IdempotencyStore>,
    pub positions: PositionBook,
    pub fleet: FleetEngine,
    pub bar_cache: Arc<BarCache>,
    pub regime_cache: Arc<RegimeCache>,
}

impl AppState {
    pub fn new(config: RuntimeConfig, bar_store: Arc<dyn BarCacheStore>, bar_provider: Arc<dyn BarProvider>) -> Self {
        let positions = PositionBook::new();
        let starting_equity: Decimal = DEFAULT_STARTING_EQUITY.parse().expect("valid default equity literal");

        Self {
            bots: Arc::new(BotLifecycleRegistry::new()),
            governance: Arc::new(GovernanceRegistry::new()),
            audit: Arc::new(AuditLog::new()),
            idempotency: Arc::new(IdempotencyStore::new()),
            fleet: FleetEngine::new(starting_equity, positions.clone()),
            positions,
            bar_cache: Arc::new(BarCache::new(bar_store, bar_provider)),
            regime_cache: RegimeCache::new(),
            config,
        }
    }
}
