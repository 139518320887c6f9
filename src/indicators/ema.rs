// =============================================================================
// Exponential Moving Average (EMA) — incremental state
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average.
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The backtest executor walks bars one at a time rather than recomputing a
// whole series per call, so this is an incremental state machine (seeded
// from the SMA of the warm-up window) rather than a batch function over a
// slice — see the Design Notes on indicator state machines.
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct EmaState {
    period: usize,
    multiplier: f64,
    value: Option<f64>,
}

impl EmaState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            value: None,
        }
    }

    /// Seed the EMA from a warm-up window: the simple average of the most
    /// recent `period` closes, matching the teacher's batch seeding
    /// convention.
    pub fn warm_up(&mut self, closes: &[f64]) {
        if closes.len() < self.period || self.period == 0 {
            return;
        }
        let sma: f64 = closes[closes.len() - self.period..].iter().sum::<f64>() / self.period as f64;
        if sma.is_finite() {
            self.value = Some(sma);
        }
    }

    /// Feed one new close, updating and returning the current EMA value.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        let next = match self.value {
            None => close,
            Some(prev) => close * self.multiplier + prev * (1.0 - self.multiplier),
        };
        if !next.is_finite() {
            return self.value;
        }
        self.value = Some(next);
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_up_seeds_with_sma() {
        let mut ema = EmaState::new(3);
        ema.warm_up(&[1.0, 2.0, 3.0]);
        assert_eq!(ema.value(), Some(2.0));
    }

    #[test]
    fn update_moves_toward_new_close() {
        let mut ema = EmaState::new(3);
        ema.warm_up(&[1.0, 2.0, 3.0]);
        let updated = ema.update(10.0).unwrap();
        assert!(updated > 2.0 && updated < 10.0);
    }

    #[test]
    fn without_warm_up_first_update_seeds_directly() {
        let mut ema = EmaState::new(9);
        assert_eq!(ema.update(42.0), Some(42.0));
    }

    #[test]
    fn non_finite_update_is_ignored() {
        let mut ema = EmaState::new(3);
        ema.warm_up(&[1.0, 2.0, 3.0]);
        let before = ema.value();
        ema.update(f64::NAN);
        assert_eq!(ema.value(), before);
    }
}
