// =============================================================================
// Volume-Weighted Average Price (VWAP) — session-anchored incremental state
// =============================================================================
//
// VWAP = cumulative(typical_price * volume) / cumulative(volume), accumulated
// from the start of the trading session. Unlike EMA/SMA/RSI/ATR this never
// "warms up" from history — it resets at the session boundary and accrues
// bar by bar for the rest of the day, which is why `reset()` exists instead
// of a `warm_up` method.
// =============================================================================

pub struct VwapState {
    cum_pv: f64,
    cum_volume: f64,
    value: Option<f64>,
}

impl VwapState {
    pub fn new() -> Self {
        Self { cum_pv: 0.0, cum_volume: 0.0, value: None }
    }

    /// Clear accumulated state at the start of a new session.
    pub fn reset(&mut self) {
        self.cum_pv = 0.0;
        self.cum_volume = 0.0;
        self.value = None;
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64, volume: f64) -> Option<f64> {
        let typical = (high + low + close) / 3.0;
        if !typical.is_finite() || !volume.is_finite() || volume <= 0.0 {
            return self.value;
        }
        self.cum_pv += typical * volume;
        self.cum_volume += volume;
        if self.cum_volume > 0.0 {
            self.value = Some(self.cum_pv / self.cum_volume);
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Default for VwapState {
    fn default() -> Self {
        Self::new()
    }
}
