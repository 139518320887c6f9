// =============================================================================
// Backtest executor — §4.2, the heart of the core
// =============================================================================
//
// Turns a bot plus a bar range into a `BacktestSession`: deterministic trade
// generation, full provenance, and aggregate metrics. Every pipeline step is
// fail-closed — the first failing step short-circuits the rest and the
// session is persisted `Failed` with a classified error, never left
// half-populated.
// =============================================================================

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bar_cache::provider::simulate_bars;
use crate::bar_cache::{Bar, BarCache, BarRequest};
use crate::config::RuntimeConfig;
use crate::domain::{
    BacktestSession, Bot, ConfigSnapshot, ErrorClassificationRecord, ProvenanceStatus,
    SessionMetrics, SessionStatus, TradeLog,
};
use crate::errors::{classify, BacktestErrorCode, ErrorClassification};
use crate::exit::triple_barrier::{BarrierState, ExitRules, TrailingStopConfig};
use crate::indicators::state::WARM_UP_BARS;
use crate::indicators::IndicatorSuite;
use crate::instruments::{self, InstrumentSpec};
use crate::money::round_to_tick;
use crate::rng::derive_seed;
use crate::strategy::archetypes;
use crate::strategy::entry_conditions::{self, EntryContext};
use crate::strategy::rules::{
    ConfirmationConfig, EntryPredicateConfig, InvalidationConfig, RiskBlock, SessionBlock, StrategyRules,
};
use crate::types::{SessionMode, Side, Stage, Timeframe};

use super::pnl::{aggregate_metrics, compute_trade_pnl, equity_curve};
use super::profile::ExecutionProfile;
use super::session::{self, et_trading_day, is_within_trading_session};
use super::validate::validate_bars;

const DEFAULT_STOP_LOSS_TICKS: i64 = 20;
const DEFAULT_TAKE_PROFIT_TICKS: i64 = 40;
const DEFAULT_TIME_STOP_BARS: u32 = 200;

/// A single pipeline step's failure: the code drives both classification and
/// whether the session halts.
struct Failure {
    code: BacktestErrorCode,
    message: String,
}

impl Failure {
    fn new(code: BacktestErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

pub struct BacktestRequest {
    pub bot: Bot,
    pub session_id: Uuid,
    pub generation_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub starting_capital: Decimal,
}

/// Run one backtest session end to end. Never returns an `Err` — pipeline
/// failures are captured on the returned session's `error_classification`
/// instead, per §4.2's "on any exception, classify and persist, do not
/// re-throw" rule. The trade log is returned alongside the session since it
/// is its own persisted collection, keyed by `backtest_session_id`, not a
/// field of the session itself.
pub async fn run(req: BacktestRequest, bar_cache: &BarCache, config: &RuntimeConfig) -> (BacktestSession, Vec<TradeLog>) {
    let seed = derive_seed(&req.bot.id.to_string(), &req.session_id.to_string());
    let mut session = build_skeleton(&req, seed);

    info!(bot_id = %req.bot.id, session_id = %req.session_id, seed, "backtest session starting");

    match execute(&req, bar_cache, config, seed, &mut session).await {
        Ok(trades) => {
            session.status = SessionStatus::Completed;
            (session, trades)
        }
        Err(failure) => {
            let classification = classify(failure.code, failure.message.clone());
            warn!(
                bot_id = %req.bot.id,
                session_id = %req.session_id,
                code = %failure.code,
                should_halt = classification.should_halt,
                "backtest session failed"
            );
            session.status = SessionStatus::Failed;
            session.error_classification = Some(to_record(classification));
            (session, Vec::new())
        }
    }
}

fn build_skeleton(req: &BacktestRequest, seed: u32) -> BacktestSession {
    BacktestSession {
        id: req.session_id,
        bot_id: req.bot.id,
        generation_id: req.generation_id,
        status: SessionStatus::Queued,
        config_snapshot: build_config_snapshot(req, seed),
        rules_hash: None,
        expected_entry_condition: None,
        actual_entry_condition: None,
        provenance_status: None,
        rules_profile_used: None,
        session_mode_used: req.bot.session_mode,
        metrics: SessionMetrics::default(),
        total_bar_count: 0,
        session_filter_bar_count: 0,
        relaxed_flags_applied: Vec::new(),
        error_classification: None,
        equity_curve: Vec::new(),
        created_at: Utc::now(),
    }
}

fn to_record(c: ErrorClassification) -> ErrorClassificationRecord {
    ErrorClassificationRecord {
        code: c.code,
        severity: c.severity,
        should_halt: c.should_halt,
        message: c.message,
    }
}

async fn execute(
    req: &BacktestRequest,
    bar_cache: &BarCache,
    config: &RuntimeConfig,
    seed: u32,
    session: &mut BacktestSession,
) -> Result<Vec<TradeLog>, Failure> {
    // Step 1: instrument lookup.
    let spec = instruments::lookup(&req.bot.symbol)
        .ok_or_else(|| Failure::new(BacktestErrorCode::InstrumentNotSupported, format!("unsupported symbol {}", req.bot.symbol)))?;

    // Step 3: fetch bars, preferring the real provider; simulated fallback
    // only when explicitly allowed, and only via the session-seeded path so
    // the determinism contract holds.
    let bar_req = BarRequest {
        symbol: spec.symbol.to_string(),
        timeframe: req.timeframe,
        session_mode: req.bot.session_mode,
        start_ts: req.start_ts.timestamp(),
        end_ts: req.end_ts.timestamp(),
        trace_id: req.session_id.to_string(),
    };
    let bars = match bar_cache.fetch(&bar_req).await {
        Ok(outcome) => outcome.bars,
        Err(e) => {
            if !config.allow_sim_fallback {
                return Err(Failure::new(
                    BacktestErrorCode::DataProvenanceViolation,
                    format!("real provider unavailable and ALLOW_SIM_FALLBACK is false: {e}"),
                ));
            }
            simulate_bars(spec, seed, &bar_req)
        }
    };

    if bars.is_empty() {
        session.metrics = SessionMetrics::default();
        session.error_classification = Some(to_record(classify(BacktestErrorCode::NoData, "no bars returned for requested range")));
        return Ok(Vec::new());
    }

    // Step 4: validate bars.
    let validation_errors = validate_bars(&bars, spec, req.timeframe.seconds());
    if !validation_errors.is_empty() {
        return Err(Failure::new(BacktestErrorCode::BarValidationFailed, validation_errors.join("; ")));
    }
    session.total_bar_count = bars.len() as u32;

    // Step 5: resolve archetype.
    let archetype_id = resolve_archetype_id(&req.bot)?;
    let archetype = archetypes::lookup(&archetype_id)
        .ok_or_else(|| Failure::new(BacktestErrorCode::ArchetypeNotImplemented, format!("archetype {archetype_id} has no entry-condition mapping")))?;

    // Step 6: build strategy rules, verify provenance.
    let rules = build_strategy_rules(&req.bot, archetype.id, archetype.entry_condition);
    let expected = archetype.entry_condition;
    let actual = rules.entry_condition_type;
    if expected != actual {
        session.provenance_status = Some(ProvenanceStatus::Mismatch);
        return Err(Failure::new(
            BacktestErrorCode::StrategyProvenanceViolation,
            format!("expected entry condition {expected} but built rules resolved to {actual}"),
        ));
    }
    session.provenance_status = Some(ProvenanceStatus::Verified);
    session.rules_hash = Some(rules.rules_hash());
    session.expected_entry_condition = Some(expected.to_string());
    session.actual_entry_condition = Some(actual.to_string());

    // Step 7/8: widen session + select rules profile for TRIALS/PAPER.
    let trials_relaxed = matches!(req.bot.stage, Stage::Trials);
    let widened = matches!(req.bot.stage, Stage::Trials | Stage::Paper);

    // Step 9: session mode / bypass.
    let bypass = session::session_bypass(req.bot.session_mode);
    let profile = ExecutionProfile::new(trials_relaxed, bypass, req.bot.session_mode);
    session.rules_profile_used = Some(profile.rules_profile());
    session.session_mode_used = req.bot.session_mode;
    session.relaxed_flags_applied = profile.relaxed_flags();

    let mut trades = run_execution_loop(&bars, spec, &rules, &profile, widened, req.session_id)?;
    session.session_filter_bar_count = bars.len().saturating_sub(WARM_UP_BARS) as u32;

    if trades.is_empty() {
        return Err(Failure::new(BacktestErrorCode::ZeroTradesGenerated, "no trades produced over the requested range"));
    }

    for trade in &mut trades {
        trade.backtest_session_id = session.id;
    }

    // Atomic persistence is a single in-memory assignment here (no external
    // transactional store in this core); metrics/equity derive from the
    // trade log as one unit, matching the "all or none" semantics.
    session.metrics = aggregate_metrics(&trades, req.starting_capital);
    session.equity_curve = equity_curve(&trades, req.starting_capital);

    Ok(trades)
}

fn resolve_archetype_id(bot: &Bot) -> Result<String, Failure> {
    if let Some(id) = &bot.archetype_id {
        if archetypes::lookup(id).is_some() {
            return Ok(id.clone());
        }
    }
    if let Some(serde_json::Value::String(explicit)) = bot.strategy_config.get("archetype") {
        if archetypes::lookup(explicit).is_some() {
            return Ok(explicit.clone());
        }
    }
    archetypes::infer_from_name(&bot.name)
        .map(|s| s.to_string())
        .ok_or_else(|| Failure::new(BacktestErrorCode::ArchetypeInferenceFailed, format!("could not infer an archetype from bot name {:?}", bot.name)))
}

fn build_strategy_rules(bot: &Bot, archetype_id: &str, entry_condition: crate::types::EntryConditionType) -> StrategyRules {
    StrategyRules {
        version: "1".to_string(),
        archetype: archetype_id.to_string(),
        entry_condition_type: entry_condition,
        entry_predicate: EntryPredicateConfig { thresholds: crate::strategy::rules::default_thresholds(entry_condition) },
        confirmations: ConfirmationConfig::default(),
        invalidations: InvalidationConfig::default(),
        exit_rules: ExitRules {
            stop_loss_ticks: if bot.risk_config.stop_loss_ticks > 0 { bot.risk_config.stop_loss_ticks } else { DEFAULT_STOP_LOSS_TICKS },
            take_profit_ticks: DEFAULT_TAKE_PROFIT_TICKS,
            trailing_stop: Some(TrailingStopConfig { activation_ticks: 10, trail_ticks: 6 }),
            time_stop_bars: Some(DEFAULT_TIME_STOP_BARS),
        },
        risk: RiskBlock {
            stop_loss_ticks: bot.risk_config.stop_loss_ticks,
            max_position_size: bot.risk_config.max_position_size.max(1),
        },
        session: SessionBlock::default(),
    }
}

struct OpenTrade {
    side: Side,
    entry_price: Decimal,
    entry_ts: DateTime<Utc>,
    entry_reason: String,
    barrier: BarrierState,
}

fn run_execution_loop(
    bars: &[Bar],
    spec: &InstrumentSpec,
    rules: &StrategyRules,
    profile: &ExecutionProfile,
    widened: bool,
    session_id: Uuid,
) -> Result<Vec<TradeLog>, Failure> {
    if bars.len() <= WARM_UP_BARS {
        return Ok(Vec::new());
    }

    let mut suite = IndicatorSuite::new();
    let warm_up_count = WARM_UP_BARS;
    suite.warm_up(&bars[..warm_up_count]);

    let mut trades = Vec::new();
    let mut trade_index: u64 = 0;
    let mut open: Option<OpenTrade> = None;
    let mut current_day = et_trading_day(bars[warm_up_count - 1].ts);
    let mut prior_session_open: Option<Decimal> = bars.first().map(|b| b.open);

    let mut window: Vec<Bar> = bars[..warm_up_count].to_vec();

    for bar in &bars[warm_up_count..] {
        let day = et_trading_day(bar.ts);
        if day != current_day {
            prior_session_open = suite.session_open;
            suite.reset_session();
            current_day = day;
        }

        suite.on_bar(bar);
        window.push(*bar);
        if window.len() > 500 {
            window.remove(0);
        }

        let in_session = is_within_trading_session(bar.ts, profile.session_mode, profile.session_bypass, widened);

        if !in_session {
            if let Some(mut trade) = open.take() {
                trades.push(close_trade(&mut trade, bar.close, bar.ts, spec, "SESSION_END", session_id, trade_index));
                trade_index += 1;
            }
            continue;
        }

        if in_no_trade_window(bar.ts, &rules.session.no_trade_windows, profile.session_bypass) {
            continue;
        }

        if let Some(trade) = &mut open {
            if let Some((reason, exit_price)) = trade.barrier.evaluate(bar.high, bar.low, bar.close) {
                let label = reason.to_string();
                let closed = close_trade(trade, exit_price, bar.ts, spec, &label, session_id, trade_index);
                trade_index += 1;
                trades.push(closed);
                open = None;
            }
            continue;
        }

        if !suite.is_warm() {
            continue;
        }

        let ctx = EntryContext { bar, window: &window, indicators: &suite, prior_session_open };
        let fires = entry_conditions::evaluate(rules.entry_condition_type, &ctx, &rules.entry_predicate, profile);
        if !fires {
            continue;
        }
        if !confirmations_pass(&suite, &rules.confirmations, profile) {
            continue;
        }
        if !invalidations_pass(bar, &rules.invalidations, spec) {
            continue;
        }

        let side = infer_side(rules.entry_condition_type, &suite);
        let entry_price = round_to_tick(bar.close, spec.tick_size);
        let barrier = BarrierState::new(rules.exit_rules.clone(), side, entry_price, spec.tick_size);
        open = Some(OpenTrade {
            side,
            entry_price,
            entry_ts: bar.ts,
            entry_reason: rules.entry_condition_type.to_string(),
            barrier,
        });
    }

    // Any position still open at the end of the range is closed at the
    // final bar's close so no trade is silently dropped from the log.
    if let (Some(mut trade), Some(last)) = (open.take(), bars.last()) {
        trades.push(close_trade(&mut trade, last.close, last.ts, spec, "RANGE_END", session_id, trade_index));
    }

    Ok(trades)
}

/// Derive a stable UUID from `session_id`, the trade's position in the
/// session's trade list, and a tag distinguishing the id from the trace id,
/// so two backtests over identical inputs produce a byte-identical trade log
/// (§8 invariant 7) instead of diverging on `Uuid::new_v4`'s randomness.
fn deterministic_trade_uuid(session_id: Uuid, trade_index: u64, tag: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(trade_index.to_le_bytes());
    hasher.update(tag.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn close_trade(
    trade: &mut OpenTrade,
    exit_price: Decimal,
    exit_ts: DateTime<Utc>,
    spec: &InstrumentSpec,
    reason_label: &str,
    session_id: Uuid,
    trade_index: u64,
) -> TradeLog {
    let qty = 1u32;
    let pnl = compute_trade_pnl(trade.side, trade.entry_price, exit_price, qty, spec);
    TradeLog {
        id: deterministic_trade_uuid(session_id, trade_index, "id"),
        backtest_session_id: Uuid::nil(),
        entry_reason_code: trade.entry_reason.clone(),
        side: trade.side,
        entry_price: trade.entry_price,
        exit_price,
        entry_ts: trade.entry_ts,
        exit_ts,
        exit_reason: reason_label.to_string(),
        quantity: qty,
        gross_pnl: pnl.gross,
        fees: pnl.fees,
        slippage: pnl.slippage,
        net_pnl: pnl.net,
        trace_id: deterministic_trade_uuid(session_id, trade_index, "trace").to_string(),
        rule_version: "1".to_string(),
    }
}

fn infer_side(entry: crate::types::EntryConditionType, suite: &IndicatorSuite) -> Side {
    use crate::types::EntryConditionType::*;
    match entry {
        Breakout | TrendContinuation | MomentumSurge | GapFill => {
            match (suite.ema9.value(), suite.ema20.value()) {
                (Some(fast), Some(slow)) if fast < slow => Side::Short,
                _ => Side::Long,
            }
        }
        MeanReversion | Reversal | VwapTouch | RangeScalp | GapFade => {
            match suite.rsi14.value() {
                Some(rsi) if rsi >= 50.0 => Side::Short,
                _ => Side::Long,
            }
        }
    }
}

fn confirmations_pass(suite: &IndicatorSuite, cfg: &ConfirmationConfig, profile: &ExecutionProfile) -> bool {
    if profile.trials_relaxed {
        return true;
    }
    if let (Some(avg_vol), Some(atr)) = (suite.average_volume(), suite.atr14.value()) {
        if avg_vol > 0.0 && atr / avg_vol.max(1.0) > cfg.max_volatility_atr_pct {
            return false;
        }
    }
    true
}

fn invalidations_pass(bar: &Bar, cfg: &InvalidationConfig, spec: &InstrumentSpec) -> bool {
    let spread_ticks = ((bar.high - bar.low) / spec.tick_size).to_string().parse::<f64>().unwrap_or(0.0);
    spread_ticks <= cfg.max_spread_ticks as f64
}

fn in_no_trade_window(ts: DateTime<Utc>, windows: &[(String, String)], bypass: bool) -> bool {
    if bypass || windows.is_empty() {
        return false;
    }
    let t = ts.with_timezone(&chrono_tz::US::Eastern).time();
    windows.iter().any(|(start, end)| {
        let (Some(s), Some(e)) = (parse_hm(start), parse_hm(end)) else { return false };
        if s <= e {
            t >= s && t < e
        } else {
            t >= s || t < e
        }
    })
}

fn parse_hm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// SHA-256 of a canonical config-shape JSON object, truncated to the first
/// 16 hex characters, per §4.2 step 2.
pub fn config_hash(req: &BacktestRequest) -> String {
    let shape = serde_json::json!({
        "symbol": req.bot.symbol,
        "timeframe": req.timeframe.as_str(),
        "session_mode": req.bot.session_mode.to_string(),
        "start_ts": req.start_ts.timestamp(),
        "end_ts": req.end_ts.timestamp(),
        "starting_capital": req.starting_capital.to_string(),
    });
    let mut hasher = Sha256::new();
    hasher.update(shape.to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

pub fn build_config_snapshot(req: &BacktestRequest, seed: u32) -> ConfigSnapshot {
    ConfigSnapshot {
        seed,
        config_hash: config_hash(req),
        session_filter: req.bot.session_mode.to_string(),
        fill_model: "NEXT_BAR_OPEN".to_string(),
        sampling_method: "BAR_WALK".to_string(),
        history_range: (req.start_ts, req.end_ts),
        instrument_symbol: req.bot.symbol.clone(),
    }
}
