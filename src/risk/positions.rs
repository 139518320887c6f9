// =============================================================================
// Position Book — §4.4.1, resolves the "getBotPositions always empty" gap
// =============================================================================
//
// In-memory, per-bot/per-stage open-position state, generalized from the
// teacher's single-account spot `position_engine::PositionManager` to the
// futures-style, multi-bot shape this platform's VaR and fleet-exposure
// checks need. Updated by the execution/reconciliation path; read by the
// per-bot risk gates (§4.4) and the fleet engine's exposure aggregation.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{Side, Stage};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub bot_id: Uuid,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub bot_id: Uuid,
    pub symbol: String,
    pub sector: String,
    pub stage: Stage,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub notional: Decimal,
}

/// `Arc<RwLock<HashMap<..>>>`-backed per-bot position state, shared between
/// the execution path (writer) and the risk/fleet engines (readers).
#[derive(Clone)]
pub struct PositionBook {
    inner: Arc<RwLock<HashMap<PositionKey, OpenPosition>>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn open(&self, position: OpenPosition) {
        let key = PositionKey { bot_id: position.bot_id, symbol: position.symbol.clone() };
        self.inner.write().insert(key, position);
    }

    pub fn close(&self, bot_id: Uuid, symbol: &str) -> Option<OpenPosition> {
        self.inner.write().remove(&PositionKey { bot_id, symbol: symbol.to_string() })
    }

    /// All open positions for one bot — what `getBotPositions` should have
    /// returned in the reference implementation.
    pub fn for_bot(&self, bot_id: Uuid) -> Vec<OpenPosition> {
        self.inner.read().values().filter(|p| p.bot_id == bot_id).cloned().collect()
    }

    pub fn all(&self) -> Vec<OpenPosition> {
        self.inner.read().values().cloned().collect()
    }

    /// Net VaR proxy for one bot: 5% of the sum of its open notional, the
    /// "basic VaR limit" from §4.4's per-bot gates.
    pub fn bot_var_estimate(&self, bot_id: Uuid, var_fraction: Decimal) -> Decimal {
        let notional: Decimal = self.for_bot(bot_id).iter().map(|p| p.notional).sum();
        notional * var_fraction
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos(bot_id: Uuid, symbol: &str) -> OpenPosition {
        OpenPosition {
            bot_id,
            symbol: symbol.to_string(),
            sector: "INDEX".to_string(),
            stage: Stage::Live,
            side: Side::Long,
            quantity: 2,
            entry_price: dec!(4500),
            notional: dec!(9000),
        }
    }

    #[test]
    fn open_then_close_round_trips() {
        let book = PositionBook::new();
        let bot_id = Uuid::new_v4();
        book.open(pos(bot_id, "MES"));
        assert_eq!(book.for_bot(bot_id).len(), 1);
        let closed = book.close(bot_id, "MES");
        assert!(closed.is_some());
        assert!(book.for_bot(bot_id).is_empty());
    }

    #[test]
    fn var_estimate_scales_with_notional() {
        let book = PositionBook::new();
        let bot_id = Uuid::new_v4();
        book.open(pos(bot_id, "MES"));
        assert_eq!(book.bot_var_estimate(bot_id, dec!(0.05)), dec!(450.00));
    }
}
