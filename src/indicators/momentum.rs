// =============================================================================
// Momentum / Rate of Change — incremental state
// =============================================================================
//
// momentum_n = close_t - close_{t-n}
// Expressed as a plain price difference rather than a percentage, matching
// the entry-condition predicates that compare momentum against a tick-based
// threshold (see strategy::entry_conditions).
// =============================================================================

use std::collections::VecDeque;

pub struct MomentumState {
    lookback: usize,
    history: VecDeque<f64>,
    value: Option<f64>,
}

impl MomentumState {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(1),
            history: VecDeque::with_capacity(lookback.max(1) + 1),
            value: None,
        }
    }

    pub fn warm_up(&mut self, closes: &[f64]) {
        let start = closes.len().saturating_sub(self.lookback + 1);
        for &c in &closes[start..] {
            self.update(c);
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if !close.is_finite() {
            return self.value;
        }
        self.history.push_back(close);
        if self.history.len() > self.lookback + 1 {
            self.history.pop_front();
        }
        if self.history.len() == self.lookback + 1 {
            let oldest = *self.history.front().unwrap();
            self.value = Some(close - oldest);
        }
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
    fn none_until_lookback_is_full() {
        let mut m = MomentumState::new(3);
        assert_eq!(m.update(1.0), None);
        assert_eq!(m.update(2.0), None);
        assert_eq!(m.update(3.0), None);
        assert_eq!(m.update(4.0), Some(3.0)); // 4 - 1
    }

    #[test]
    fn slides_the_lookback_window() {
        let mut m = MomentumState::new(2);
        for c in [10.0, 10.0, 12.0, 14.0, 9.0] {
            m.update(c);
        }
        assert_eq!(m.value(), Some(9.0 - 12.0));
    }
}
