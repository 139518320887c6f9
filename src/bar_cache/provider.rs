// =============================================================================
// BarProvider — the external market-data fetch contract (§6)
// =============================================================================
//
// Market-data providers themselves are explicitly out of scope (§1); only
// the fetch contract is specified here: given symbol/timeframe/UTC
// start-end/trace id, return ordered, UTC bars at the requested timeframe.
// `UnavailableProvider` is the default "no real integration wired" stand-in
// — a concrete adapter (Databento, etc.) would implement this same trait
// and be substituted in `AppState` construction.
//
// `SimulatedProvider` is the one piece of provider behavior this core does
// own, because determinism (§4.2) depends on its exact algorithm: a seeded,
// mean-reverting random walk from the instrument's base price, clamped to
// its price bounds and rounded to tick. The backtest executor calls
// `simulate_bars` directly with its session-derived seed rather than going
// through `BarProvider::fetch` (whose seed would come from wall-clock time),
// since the simulated path must reproduce bit-identically for the same
// `(botId, sessionId)`.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::instruments::{self, InstrumentSpec};
use crate::rng::Mulberry32;
use crate::money::round_to_tick;

use super::{Bar, BarRequest};

#[async_trait]
pub trait BarProvider: Send + Sync {
    async fn fetch(&self, req: &BarRequest) -> anyhow::Result<Vec<Bar>>;
}

/// Default provider: no real market-data integration is wired in this core.
/// Always fails, forcing the backtest executor's step 3 to fall through to
/// the simulated path (only if `ALLOW_SIM_FALLBACK` permits it) or fail
/// closed with `DATA_PROVENANCE_VIOLATION`.
pub struct UnavailableProvider;

#[async_trait]
impl BarProvider for UnavailableProvider {
    async fn fetch(&self, _req: &BarRequest) -> anyhow::Result<Vec<Bar>> {
        anyhow::bail!("no real market-data provider configured")
    }
}

/// Provider wrapper around the seeded simulator, usable anywhere a generic
/// `BarProvider` is needed (tests, a dev-mode cache warm-up). Derives its
/// seed from the request rather than a session id, so it is deterministic
/// per `(symbol, range)` but is *not* the path the executor uses for its own
/// determinism contract.
pub struct SimulatedProvider;

impl SimulatedProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarProvider for SimulatedProvider {
    async fn fetch(&self, req: &BarRequest) -> anyhow::Result<Vec<Bar>> {
        let spec = instruments::lookup(&req.symbol)
            .ok_or_else(|| anyhow::anyhow!("unknown symbol {}", req.symbol))?;
        let seed = crate::rng::derive_seed(&req.symbol, &format!("{}:{}", req.start_ts, req.end_ts));
        Ok(simulate_bars(spec, seed, req))
    }
}

/// Generate a deterministic mean-reverting random walk of bars for
/// `instrument`, seeded by `seed`, covering `[req.start_ts, req.end_ts)` at
/// `req.timeframe`'s cadence.
pub fn simulate_bars(instrument: &InstrumentSpec, seed: u32, req: &BarRequest) -> Vec<Bar> {
    let mut rng = Mulberry32::new(seed);
    let step_secs = req.timeframe.seconds();
    if step_secs <= 0 || req.end_ts <= req.start_ts {
        return Vec::new();
    }

    let base_price: f64 = instrument.base_price.to_string().parse().unwrap_or(1.0);
    let min_price: f64 = instrument.min_price.to_string().parse().unwrap_or(0.0);
    let max_price: f64 = instrument.max_price.to_string().parse().unwrap_or(f64::MAX);
    let tick: f64 = instrument.tick_size.to_string().parse().unwrap_or(0.01);

    // Mean-reversion strength: pulls price back toward base_price each step,
    // proportional to the current deviation.
    const REVERSION_STRENGTH: f64 = 0.02;
    const STEP_VOL_FRACTION: f64 = 0.0015;

    let mut price = base_price;
    let mut bars = Vec::new();
    let mut ts = req.start_ts;

    while ts < req.end_ts {
        let deviation = price - base_price;
        let drift = -REVERSION_STRENGTH * deviation;
        let shock = rng.next_gaussian() * base_price * STEP_VOL_FRACTION;
        let open = price;
        let close_unclamped = price + drift + shock;
        let close = close_unclamped.clamp(min_price, max_price);

        let wick_range = (base_price * STEP_VOL_FRACTION * 1.5).max(tick);
        let high_unclamped = open.max(close) + rng.next_range(0.0, wick_range);
        let low_unclamped = open.min(close) - rng.next_range(0.0, wick_range);
        let high = high_unclamped.clamp(min_price, max_price);
        let low = low_unclamped.clamp(min_price, max_price).min(high);

        let volume = rng.next_range(500.0, 5000.0);

        let ts_dt: DateTime<Utc> = Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);

        bars.push(Bar {
            ts: ts_dt,
            open: round_to_tick(dec(open), instrument.tick_size),
            high: round_to_tick(dec(high), instrument.tick_size),
            low: round_to_tick(dec(low), instrument.tick_size),
            close: round_to_tick(dec(close), instrument.tick_size),
            volume: dec(volume.round()),
        });

        price = close;
        ts += step_secs;
    }

    bars
}

fn dec(v: f64) -> Decimal {
    Decimal::try_from(v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionMode, Timeframe};

    fn req() -> BarRequest {
        BarRequest {
            symbol: "MES".to_string(),
            timeframe: Timeframe::M5,
            session_mode: SessionMode::RthUs,
            start_ts: 1_700_000_000,
            end_ts: 1_700_000_000 + 300 * 200,
            trace_id: "t".to_string(),
        }
    }

    #[test]
    fn same_seed_produces_identical_bars() {
        let spec = instruments::lookup("MES").unwrap();
        let r = req();
        let a = simulate_bars(spec, 12345, &r);
        let b = simulate_bars(spec, 12345, &r);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.open, y.open);
            assert_eq!(x.close, y.close);
            assert_eq!(x.ts, y.ts);
        }
    }

    #[test]
    fn bars_stay_within_instrument_bounds() {
        let spec = instruments::lookup("MES").unwrap();
        let r = req();
        let bars = simulate_bars(spec, 777, &r);
        for b in &bars {
            assert!(b.high <= spec.max_price);
            assert!(b.low >= spec.min_price);
            assert!(b.low <= b.high);
        }
    }

    #[test]
    fn prices_are_tick_aligned() {
        let spec = instruments::lookup("MES").unwrap();
        let r = req();
        let bars = simulate_bars(spec, 1, &r);
        for b in &bars {
            let ratio = b.close / spec.tick_size;
            assert_eq!(ratio.round(), ratio);
        }
    }

    #[test]
    fn different_seed_diverges() {
        let spec = instruments::lookup("MES").unwrap();
        let r = req();
        let a = simulate_bars(spec, 1, &r);
        let b = simulate_bars(spec, 2, &r);
        assert_ne!(a[5].close, b[5].close);
    }
}
