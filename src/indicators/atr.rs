// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing, incremental state
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Default period: 14.
// =============================================================================

/// Minimal OHLC view an `AtrState` needs per bar. Any bar type the backtest
/// executor walks (`bar_cache::Bar` included) can be converted into this via
/// `From`/a small adapter at the call site.
#[derive(Debug, Clone, Copy)]
pub struct OhlcPoint {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AtrState {
    period: usize,
    prev_close: Option<f64>,
    tr_buffer: [f64; 64],
    tr_count: usize,
    seeded: bool,
    value: Option<f64>,
}

impl AtrState {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.min(64),
            prev_close: None,
            tr_buffer: [0.0; 64],
            tr_count: 0,
            seeded: false,
            value: None,
        }
    }

    /// Seed ATR from the SMA of the first `period` true-range values computed
    /// over `points` (oldest first; needs at least `period + 1` points).
    pub fn warm_up(&mut self, points: &[OhlcPoint]) {
        if self.period == 0 || points.len() < self.period + 1 {
            return;
        }
        let window = &points[points.len() - self.period - 1..];
        let mut tr_sum = 0.0;
        for pair in window.windows(2) {
            tr_sum += true_range(pair[0].close, pair[1].high, pair[1].low);
        }
        let seed = tr_sum / self.period as f64;
        if seed.is_finite() {
            self.value = Some(seed);
            self.seeded = true;
        }
        self.prev_close = Some(window.last().unwrap().close);
    }

    /// Feed one new OHLC point, updating and returning the current ATR.
    pub fn update(&mut self, point: OhlcPoint) -> Option<f64> {
        let Some(prev_close) = self.prev_close else {
            self.prev_close = Some(point.close);
            return None;
        };
        let tr = true_range(prev_close, point.high, point.low);
        self.prev_close = Some(point.close);

        if !self.seeded {
            // Accumulate TR values until we have a full window to seed from.
            if self.tr_count < self.period {
                self.tr_buffer[self.tr_count] = tr;
                self.tr_count += 1;
            }
            if self.tr_count == self.period {
                let seed: f64 = self.tr_buffer[..self.period].iter().sum::<f64>() / self.period as f64;
                if seed.is_finite() {
                    self.value = Some(seed);
                    self.seeded = true;
                }
            }
            return self.value;
        }

        if let Some(prev_atr) = self.value {
            let period_f = self.period as f64;
            let next = (prev_atr * (period_f - 1.0) + tr) / period_f;
            if next.is_finite() {
                self.value = Some(next);
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

fn true_range(prev_close: f64, high: f64, low: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Batch convenience kept for one-shot regime/warm-up reads that have a full
/// slice up front and don't want to construct an `AtrState`.
pub fn calculate_atr(points: &[OhlcPoint], period: usize) -> Option<f64> {
    if period == 0 || points.len() < period + 1 {
        return None;
    }
    let mut state = AtrState::new(period);
    state.warm_up(&points[..period + 1]);
    for p in &points[period + 1..] {
        state.update(*p);
    }
    state.value()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(high: f64, low: f64, close: f64) -> OhlcPoint {
        OhlcPoint { high, low, close }
    }

    #[test]
    fn period_zero_returns_none() {
        let points = vec![pt(105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&points, 0).is_none());
    }

    #[test]
    fn insufficient_data_returns_none() {
        let points = vec![pt(105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&points, 14).is_none());
    }

    #[test]
    fn constant_range_converges_to_range_width() {
        let mut points = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64 * 0.1;
            points.push(pt(base + 5.0, base - 5.0, base));
        }
        let atr = calculate_atr(&points, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn gap_is_reflected_in_true_range() {
        let points = vec![
            pt(105.0, 95.0, 95.0),
            pt(115.0, 108.0, 112.0), // gap up: |115-95| = 20 > 115-108 = 7
            pt(118.0, 110.0, 115.0),
            pt(120.0, 113.0, 118.0),
        ];
        let atr = calculate_atr(&points, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn incremental_matches_batch_after_same_sequence() {
        let points: Vec<OhlcPoint> = (0..40)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 5.0;
                pt(base + 2.0, base - 2.0, base)
            })
            .collect();

        let batch = calculate_atr(&points, 14).unwrap();

        let mut state = AtrState::new(14);
        state.warm_up(&points[..15]);
        for p in &points[15..] {
            state.update(*p);
        }
        let incremental = state.value().unwrap();

        assert!((batch - incremental).abs() < 1e-9);
    }

    #[test]
    fn value_stays_positive() {
        let points: Vec<OhlcPoint> = (0..50)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.5).sin() * 10.0;
                pt(base + 2.0, base - 2.0, base + 0.5)
            })
            .collect();
        let mut state = AtrState::new(14);
        state.warm_up(&points[..15]);
        for p in &points[15..] {
            if let Some(v) = state.update(p.clone()) {
                assert!(v > 0.0);
            }
        }
    }
}
