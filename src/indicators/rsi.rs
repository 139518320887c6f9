// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing, incremental state
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an instrument is overbought or oversold.
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Seed average gain / average loss with the SMA of the first
//          `period` gains / losses.
// Step 3 — Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RsiState {
    period: usize,
    avg_gain: f64,
    avg_loss: f64,
    prev_close: Option<f64>,
    seeded: bool,
    value: Option<f64>,
}

impl RsiState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: 0.0,
            avg_loss: 0.0,
            prev_close: None,
            seeded: false,
            value: None,
        }
    }

    /// Seed average gain/loss from the SMA of the deltas in `closes`
    /// (at least `period + 1` values expected).
    pub fn warm_up(&mut self, closes: &[f64]) {
        if self.period == 0 || closes.len() < self.period + 1 {
            return;
        }
        let window = &closes[closes.len() - self.period - 1..];
        let deltas: Vec<f64> = window.windows(2).map(|w| w[1] - w[0]).collect();

        let (sum_gain, sum_loss) = deltas.iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 { (g + d, l) } else { (g, l + d.abs()) }
        });
        let period_f = self.period as f64;
        self.avg_gain = sum_gain / period_f;
        self.avg_loss = sum_loss / period_f;
        self.prev_close = Some(*window.last().unwrap());
        self.seeded = true;
        self.value = self.compute();
    }

    /// Feed one new close, updating and returning the current RSI value.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close else {
            self.prev_close = Some(close);
            return None;
        };
        let delta = close - prev;
        self.prev_close = Some(close);

        if !self.seeded {
            // Without a warm-up window, seed lazily on the first observed
            // delta (degrades gracefully rather than staying None forever).
            self.avg_gain = if delta > 0.0 { delta } else { 0.0 };
            self.avg_loss = if delta < 0.0 { delta.abs() } else { 0.0 };
            self.seeded = true;
            self.value = self.compute();
            return self.value;
        }

        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };
        let period_f = self.period as f64;
        self.avg_gain = (self.avg_gain * (period_f - 1.0) + gain) / period_f;
        self.avg_loss = (self.avg_loss * (period_f - 1.0) + loss) / period_f;
        self.value = self.compute();
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    fn compute(&self) -> Option<f64> {
        let rsi = if self.avg_loss == 0.0 && self.avg_gain == 0.0 {
            50.0
        } else if self.avg_loss == 0.0 {
            100.0
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
        if rsi.is_finite() {
            Some(rsi)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gains_converge_toward_100() {
        let mut rsi = RsiState::new(14);
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        rsi.warm_up(&closes[..15]);
        for &c in &closes[15..] {
            rsi.update(c);
        }
        assert!(rsi.value().unwrap() > 95.0);
    }

    #[test]
    fn all_losses_converge_toward_0() {
        let mut rsi = RsiState::new(14);
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        rsi.warm_up(&closes[..15]);
        for &c in &closes[15..] {
            rsi.update(c);
        }
        assert!(rsi.value().unwrap() < 5.0);
    }

    #[test]
    fn flat_market_is_neutral() {
        let mut rsi = RsiState::new(14);
        let closes = vec![100.0; 20];
        rsi.warm_up(&closes[..15]);
        for &c in &closes[15..] {
            rsi.update(c);
        }
        assert_eq!(rsi.value(), Some(50.0));
    }

    #[test]
    fn stays_within_0_to_100() {
        let mut rsi = RsiState::new(14);
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        rsi.warm_up(&closes[..15]);
        for &c in &closes[15..] {
            if let Some(v) = rsi.update(c) {
                assert!((0.0..=100.0).contains(&v));
            }
        }
    }
}
