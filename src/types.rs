// =============================================================================
// Shared types used across the bot-lifecycle platform
// =============================================================================

use serde::{Deserialize, Serialize};

/// A bot's position on the capital-exposure ladder, from research to live
/// capital. Totally ordered except for `Killed`, which is a terminal sink
/// reachable from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Trials,
    Paper,
    Shadow,
    Canary,
    Live,
    Killed,
}

impl Stage {
    /// The stage immediately above this one on the ladder, or `None` at the
    /// top (`Live`) or for the terminal `Killed` sink.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Trials => Some(Stage::Paper),
            Stage::Paper => Some(Stage::Shadow),
            Stage::Shadow => Some(Stage::Canary),
            Stage::Canary => Some(Stage::Live),
            Stage::Live => None,
            Stage::Killed => None,
        }
    }

    /// The stage immediately below this one, or `None` at the bottom
    /// (`Trials`) or for `Killed`.
    pub fn prev(self) -> Option<Stage> {
        match self {
            Stage::Trials => None,
            Stage::Paper => Some(Stage::Trials),
            Stage::Shadow => Some(Stage::Paper),
            Stage::Canary => Some(Stage::Shadow),
            Stage::Live => Some(Stage::Canary),
            Stage::Killed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Killed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Trials => "TRIALS",
            Stage::Paper => "PAPER",
            Stage::Shadow => "SHADOW",
            Stage::Canary => "CANARY",
            Stage::Live => "LIVE",
            Stage::Killed => "KILLED",
        };
        write!(f, "{s}")
    }
}

/// Canonical timeframes the bar cache and backtester understand. Only these
/// values ever appear in a cache key or a `BacktestSession.configSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Bar duration in seconds, used for continuity validation and resampling.
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which trading-session calendar a bot's backtests and live gating use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    RthUs,
    Eth,
    Full24x5,
    Custom,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionMode::RthUs => "RTH_US",
            SessionMode::Eth => "ETH",
            SessionMode::Full24x5 => "FULL_24x5",
            SessionMode::Custom => "CUSTOM",
        };
        write!(f, "{s}")
    }
}

/// Position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// The fixed catalog of entry-condition types a backtest may run with.
/// Intentionally exhaustive — adding a new archetype means adding a new
/// variant here plus a predicate in `strategy::entry_conditions`, never an
/// "other" escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryConditionType {
    Breakout,
    MeanReversion,
    VwapTouch,
    TrendContinuation,
    GapFade,
    GapFill,
    Reversal,
    RangeScalp,
    MomentumSurge,
}

impl std::fmt::Display for EntryConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryConditionType::Breakout => "BREAKOUT",
            EntryConditionType::MeanReversion => "MEAN_REVERSION",
            EntryConditionType::VwapTouch => "VWAP_TOUCH",
            EntryConditionType::TrendContinuation => "TREND_CONTINUATION",
            EntryConditionType::GapFade => "GAP_FADE",
            EntryConditionType::GapFill => "GAP_FILL",
            EntryConditionType::Reversal => "REVERSAL",
            EntryConditionType::RangeScalp => "RANGE_SCALP",
            EntryConditionType::MomentumSurge => "MOMENTUM_SURGE",
        };
        write!(f, "{s}")
    }
}
