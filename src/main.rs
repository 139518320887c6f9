// =============================================================================
// aurora-lifecycle-core — process entry point
// =============================================================================
//
// Builds the shared `AppState` and spawns the independent, single-threaded
// workers §5 describes: a fleet-risk assessment loop, a promotion/demotion
// worker, a governance-expiration sweeper, an idempotency-record cleaner,
// and a bar-cache stats reporter. An autonomy loop drives one backtest
// session per bot per cycle — "each backtest session executes on its own
// task" (§5) — since this core has no HTTP/CLI surface of its own to submit
// sessions on its behalf (§1 out-of-scope).
//
// Generalizes the teacher's `main.rs` shape (module wiring, one
// `tokio::spawn` loop per subsystem, a graceful-shutdown tail on
// `ctrl_c`) to this platform's workers instead of the teacher's market-data
// streams and execution loop.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use aurora_lifecycle_core::app_state::AppState;
use aurora_lifecycle_core::backtest::executor::{self, BacktestRequest};
use aurora_lifecycle_core::bar_cache::provider::UnavailableProvider;
use aurora_lifecycle_core::bar_cache::store::{MemoryStore, RedisStore};
use aurora_lifecycle_core::config::RuntimeConfig;
use aurora_lifecycle_core::domain::{Bot, PerformanceSnapshot, RiskConfig};
use aurora_lifecycle_core::stage_engine::governance::GovernanceError;
use aurora_lifecycle_core::stage_engine::{evaluate_cycle, GateMetrics, StageDecision};
use aurora_lifecycle_core::types::{SessionMode, Stage, Timeframe};

/// In-memory stand-in for the opaque transactional store's
/// `Generation.performanceSnapshot` lookup (§1 treats the real schema as an
/// external collaborator). The promotion worker reads from this map; the
/// backtest-driving loop writes to it after every completed session.
type SnapshotBoard = Arc<RwLock<HashMap<Uuid, PerformanceSnapshot>>>;

/// Seed a handful of demo bots spread across the ladder so every worker has
/// something to act on from process start. A real deployment creates bots
/// through the (out-of-scope) HTTP surface instead.
fn seed_demo_bots(state: &AppState) {
    let demo = [
        ("MES Breakout Trials", "MES", "breakout", Stage::Trials),
        ("MNQ Gap Fade Paper", "MNQ", "gap_fade", Stage::Paper),
        ("ES Trend Shadow", "ES", "trend_continuation", Stage::Shadow),
        ("NQ Momentum Canary", "NQ", "momentum_surge", Stage::Canary),
    ];

    for (name, symbol, archetype, stage) in demo {
        let bot = Bot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            stage,
            symbol: symbol.to_string(),
            archetype_id: Some(archetype.to_string()),
            strategy_config: HashMap::new(),
            risk_config: RiskConfig { stop_loss_ticks: 20, max_position_size: 5 },
            session_mode: SessionMode::RthUs,
            current_generation_id: Uuid::new_v4(),
            stage_locked_until: None,
            peak_equity: dec!(10_000),
            manual_promotion_mode: false,
            created_at: Utc::now(),
        };
        info!(bot_id = %bot.id, name = %bot.name, stage = %bot.stage, "seeded demo bot");
        state.bots.insert(bot);
    }
}

/// Drives one backtest per live (non-killed) bot per cycle and folds the
/// result into the snapshot board and the bot's daily-P&L log the
/// promotion worker and consecutive-losing-days trigger read from.
async fn run_backtest_cycle(state: Arc<AppState>, snapshots: SnapshotBoard) {
    let end = Utc::now();
    let start = end - ChronoDuration::days(5);

    for bot in state.bots.all() {
        if bot.is_terminal() {
            continue;
        }
        let req = BacktestRequest {
            bot: bot.clone(),
            session_id: Uuid::new_v4(),
            generation_id: bot.current_generation_id,
            start_ts: start,
            end_ts: end,
            timeframe: Timeframe::M5,
            starting_capital: dec!(10_000),
        };

        let (session, _trades) = executor::run(req, &state.bar_cache, &state.config).await;

        if session.metrics.total_trades > 0 {
            if let Some(net_pnl) = session.metrics.net_pnl {
                state.bots.record_daily_pnl(bot.id, end.date_naive(), net_pnl);
            }
            snapshots.write().insert(
                bot.id,
                PerformanceSnapshot {
                    total_trades: session.metrics.total_trades,
                    win_rate: session.metrics.win_rate.unwrap_or(0.0),
                    net_pnl: session.metrics.net_pnl.unwrap_or_default(),
                    sharpe: session.metrics.sharpe,
                    max_drawdown_pct: session.metrics.max_drawdown_pct,
                    profit_factor: session.metrics.profit_factor,
                    rules_profile_used: session.rules_profile_used.unwrap_or(aurora_lifecycle_core::domain::RulesProfile::Production),
                    session_mode_used: session.session_mode_used,
                },
            );
        }

        match session.error_classification {
            Some(rec) => warn!(bot_id = %bot.id, code = ?rec.code, "backtest session failed"),
            None => info!(bot_id = %bot.id, trades = session.metrics.total_trades, "backtest session completed"),
        }
    }
}

/// One promotion/demotion evaluation pass over every bot (§4.3). Manual
/// stage execution happens directly through the registry; CANARY→LIVE
/// always routes through governance instead.
fn run_promotion_cycle(state: &AppState, snapshots: &SnapshotBoard) {
    for bot in state.bots.all() {
        let snapshot = snapshots.read().get(&bot.id).cloned();
        let metrics = GateMetrics {
            sharpe: snapshot.as_ref().and_then(|s| s.sharpe),
            max_drawdown_pct: snapshot.as_ref().and_then(|s| s.max_drawdown_pct),
            win_rate: snapshot.as_ref().map(|s| s.win_rate),
            total_trades: snapshot.as_ref().map(|s| s.total_trades),
            profit_factor: snapshot.as_ref().and_then(|s| s.profit_factor),
            expectancy: None,
            confidence_score: Some(70.0),
            uniqueness_score: Some(50.0),
            days_in_stage: 5,
            consecutive_losing_days: state.bots.consecutive_losing_days(bot.id),
        };

        match evaluate_cycle(&bot, &metrics) {
            Some(StageDecision::Promote(target)) | Some(StageDecision::Demote(target)) => {
                state.bots.execute_stage_change(bot.id, target, &state.audit);
            }
            Some(StageDecision::RequiresGovernance(target)) => {
                match state.governance.request(
                    bot.id,
                    bot.stage,
                    target,
                    "autonomy-loop",
                    "automated promotion gate passed",
                    aurora_lifecycle_core::domain::SessionMetrics {
                        total_trades: metrics.total_trades.unwrap_or(0),
                        winning_trades: 0,
                        losing_trades: 0,
                        win_rate: metrics.win_rate,
                        net_pnl: snapshot.as_ref().map(|s| s.net_pnl),
                        sharpe: metrics.sharpe,
                        max_drawdown_pct: metrics.max_drawdown_pct,
                        profit_factor: metrics.profit_factor,
                        expectancy: None,
                    },
                    &state.audit,
                ) {
                    Ok(id) => info!(bot_id = %bot.id, approval_id = %id, "governance request filed"),
                    Err(GovernanceError::DuplicatePending) => {}
                    Err(e) => warn!(bot_id = %bot.id, error = %e, "governance request failed"),
                }
            }
            None => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║     aurora-lifecycle-core — bot lifecycle platform       ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::from_env();

    let bar_store: Arc<dyn aurora_lifecycle_core::bar_cache::store::BarCacheStore> = match &config.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => {
                info!("bar cache backed by Redis");
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "failed to connect to Redis, falling back to in-process memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            info!("no REDIS_URL configured, bar cache backed by in-process memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // No concrete real-data adapter ships with this core (§1): presence of
    // `DATABENTO_API_KEY` only gates intent upstream. Every fetch falls
    // through `UnavailableProvider` to the executor's seeded simulator,
    // gated by `ALLOW_SIM_FALLBACK`.
    let bar_provider: Arc<dyn aurora_lifecycle_core::bar_cache::provider::BarProvider> = Arc::new(UnavailableProvider);

    let state = Arc::new(AppState::new(config, bar_store, bar_provider));
    seed_demo_bots(&state);

    let snapshots: SnapshotBoard = Arc::new(RwLock::new(HashMap::new()));

    // ── Autonomy loop: one backtest session per bot per cycle ───────────
    {
        let state = state.clone();
        let snapshots = snapshots.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(45));
            loop {
                interval.tick().await;
                run_backtest_cycle(state.clone(), snapshots.clone()).await;
            }
        });
    }

    // ── Promotion/demotion worker ─────────────────────────────────────────
    {
        let state = state.clone();
        let snapshots = snapshots.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                run_promotion_cycle(&state, &snapshots);
            }
        });
    }

    // ── Fleet-risk loop (§4.4, default 60s via FLEET_RISK_INTERVAL_MS) ────
    {
        let state = state.clone();
        let interval_ms = state.config.fleet_risk_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                let current_equity = state.fleet.snapshot().current_equity;
                let action = state.fleet.assess_cycle(current_equity, &state.audit);
                if action != aurora_lifecycle_core::risk::fleet::TierAction::None {
                    warn!(?action, "fleet tier action required");
                }
                state.fleet.try_self_heal(&state.audit);
            }
        });
    }

    // ── Governance-expiration sweeper ─────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let expired = state.governance.sweep_expired(Utc::now(), &state.audit);
                if expired > 0 {
                    info!(expired, "swept expired governance requests");
                }
            }
        });
    }

    // ── Idempotency-record cleaner ─────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let evicted = state.idempotency.cleanup(Utc::now());
                if evicted > 0 {
                    info!(evicted, "cleaned up expired idempotency records");
                }
            }
        });
    }

    // ── Bar-cache stats reporter ──────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let counters = state.bar_cache.counters.snapshot();
                info!(
                    cache_hit = counters.cache_hit,
                    cache_miss = counters.cache_miss,
                    provider_fetch = counters.provider_fetch,
                    stampede_prevented = counters.stampede_prevented,
                    stampede_fallback = counters.stampede_fallback,
                    bytes = counters.bytes,
                    "bar cache stats"
                );
            }
        });
    }

    info!("all workers running — press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    let final_chain = state.audit.verify_hash_chain();
    match final_chain {
        Ok(()) => info!(entries = state.audit.len(), "audit hash chain verified clean on shutdown"),
        Err(broken) => warn!(?broken, "audit hash chain broken at shutdown"),
    }

    Ok(())
}
