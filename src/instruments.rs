// =============================================================================
// Canonical instrument registry
// =============================================================================
//
// The fixed symbol alphabet from §6: MES, MNQ, ES, NQ, YM, MYM, RTY, M2K, CL,
// GC. Every backtest's step 1 ("Instrument lookup") consults this table;
// anything outside it fails `INSTRUMENT_NOT_SUPPORTED` before any bar is
// ever fetched.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Static contract specification for one tradable instrument.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentSpec {
    pub symbol: &'static str,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Dollar value of one full point of price movement, per contract.
    pub point_value: Decimal,
    /// Lowest price the simulated-fallback walk (and bar validation) will
    /// allow for this instrument.
    pub min_price: Decimal,
    /// Highest allowed price.
    pub max_price: Decimal,
    /// Starting price used to seed the simulated mean-reverting walk.
    pub base_price: Decimal,
    /// Per-contract round-turn commission used in PnL's `fees` term.
    pub commission_per_contract: Decimal,
    /// Assumed one-way slippage in ticks, used in PnL's `slippage` term.
    pub slippage_ticks: Decimal,
}

/// The canonical registry, fixed per §6. No archetype, bot, or config can
/// introduce a symbol outside this list.
pub const REGISTRY: &[InstrumentSpec] = &[
    InstrumentSpec {
        symbol: "MES",
        tick_size: dec!(0.25),
        point_value: dec!(5),
        min_price: dec!(500),
        max_price: dec!(10000),
        base_price: dec!(4500),
        commission_per_contract: dec!(0.74),
        slippage_ticks: dec!(0.5),
    },
    InstrumentSpec {
        symbol: "MNQ",
        tick_size: dec!(0.25),
        point_value: dec!(2),
        min_price: dec!(1000),
        max_price: dec!(30000),
        base_price: dec!(15500),
        commission_per_contract: dec!(0.74),
        slippage_ticks: dec!(0.5),
    },
    InstrumentSpec {
        symbol: "ES",
        tick_size: dec!(0.25),
        point_value: dec!(50),
        min_price: dec!(500),
        max_price: dec!(10000),
        base_price: dec!(4500),
        commission_per_contract: dec!(2.25),
        slippage_ticks: dec!(0.5),
    },
    InstrumentSpec {
        symbol: "NQ",
        tick_size: dec!(0.25),
        point_value: dec!(20),
        min_price: dec!(1000),
        max_price: dec!(30000),
        base_price: dec!(15500),
        commission_per_contract: dec!(2.25),
        slippage_ticks: dec!(0.5),
    },
    InstrumentSpec {
        symbol: "YM",
        tick_size: dec!(1),
        point_value: dec!(5),
        min_price: dec!(5000),
        max_price: dec!(60000),
        base_price: dec!(35000),
        commission_per_contract: dec!(2.25),
        slippage_ticks: dec!(1),
    },
    InstrumentSpec {
        symbol: "MYM",
        tick_size: dec!(1),
        point_value: dec!(0.5),
        min_price: dec!(5000),
        max_price: dec!(60000),
        base_price: dec!(35000),
        commission_per_contract: dec!(0.74),
        slippage_ticks: dec!(1),
    },
    InstrumentSpec {
        symbol: "RTY",
        tick_size: dec!(0.1),
        point_value: dec!(50),
        min_price: dec!(500),
        max_price: dec!(4000),
        base_price: dec!(2000),
        commission_per_contract: dec!(2.25),
        slippage_ticks: dec!(1),
    },
    InstrumentSpec {
        symbol: "M2K",
        tick_size: dec!(0.1),
        point_value: dec!(5),
        min_price: dec!(500),
        max_price: dec!(4000),
        base_price: dec!(2000),
        commission_per_contract: dec!(0.74),
        slippage_ticks: dec!(1),
    },
    InstrumentSpec {
        symbol: "CL",
        tick_size: dec!(0.01),
        point_value: dec!(1000),
        min_price: dec!(5),
        max_price: dec!(200),
        base_price: dec!(75),
        commission_per_contract: dec!(2.50),
        slippage_ticks: dec!(1),
    },
    InstrumentSpec {
        symbol: "GC",
        tick_size: dec!(0.1),
        point_value: dec!(100),
        min_price: dec!(500),
        max_price: dec!(5000),
        base_price: dec!(2000),
        commission_per_contract: dec!(2.50),
        slippage_ticks: dec!(0.5),
    },
];

/// Look up an instrument's spec by symbol. Case-sensitive: the registry is
/// upper-case, and callers are expected to upper-case user-supplied symbols
/// before calling (the composite validator does this at the boundary).
pub fn lookup(symbol: &str) -> Option<&'static InstrumentSpec> {
    REGISTRY.iter().find(|s| s.symbol == symbol)
}

pub fn is_supported(symbol: &str) -> bool {
    lookup(symbol).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbols_resolve() {
        for sym in ["MES", "MNQ", "ES", "NQ", "YM", "MYM", "RTY", "M2K", "CL", "GC"] {
            assert!(lookup(sym).is_some(), "{sym} should be registered");
        }
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        assert!(lookup("ZEPHYR").is_none());
        assert!(!is_supported("zephyr"));
    }
}
