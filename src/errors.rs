// =============================================================================
// Error Taxonomy — three-tier severity, orthogonal SEV axis for human triage
// =============================================================================
//
// Two independent classifications apply to every failure in the platform:
//
//   - `Severity` (CRITICAL / RECOVERABLE / WARNING) drives *what the system
//     does*: halt-and-persist, retry-with-backoff, or log-and-continue.
//   - `Sev` (SEV-0 / SEV-1 / SEV-2) drives *what a human sees*: blocks bot
//     creation/promotion/trade, blocks only non-TRIALS creation, or is a
//     warning a reviewer can skim past.
//
// `BacktestErrorCode` is the hard-fail / recoverable / warning catalog from
// the backtest executor (§4.8). `classify` maps a code to its `Severity` and
// whether the caller must halt — this is the only place that mapping lives.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Three-tier error severity. Orthogonal to `Sev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Halt current operation, mark failed in persistence, alert.
    Critical,
    /// Log, return a retry signal; caller may retry with backoff.
    Recoverable,
    /// Log and continue.
    Warning,
}

/// Human-triage severity, independent of `Severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sev {
    /// Blocks bot creation / blocks promotion / blocks trade.
    Sev0,
    /// Blocks creation of non-TRIALS bots.
    Sev1,
    /// Warn only.
    Sev2,
}

/// A single SEV-tagged validation error, as emitted by the bot-creation
/// composite validator and the promotion gate checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SevError {
    pub code: String,
    pub field: String,
    pub message: String,
    pub sev: Sev,
}

impl SevError {
    pub fn new(code: impl Into<String>, field: impl Into<String>, message: impl Into<String>, sev: Sev) -> Self {
        Self {
            code: code.into(),
            field: field.into(),
            message: message.into(),
            sev,
        }
    }
}

/// The fixed catalog of backtest-executor error codes (§4.8). Every pipeline
/// step in `backtest::BacktestExecutor::run` fails with exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacktestErrorCode {
    InstrumentNotSupported,
    DataProvenanceViolation,
    BarValidationFailed,
    CorruptData,
    ArchetypeInferenceFailed,
    ArchetypeNotImplemented,
    StrategyProvenanceViolation,
    InvalidStrategy,
    ZeroTradesGenerated,
    CalculationError,
    UnknownError,
    TransientError,
    CacheMiss,
    NoSignals,
    NoData,
}

impl std::fmt::Display for BacktestErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InstrumentNotSupported => "INSTRUMENT_NOT_SUPPORTED",
            Self::DataProvenanceViolation => "DATA_PROVENANCE_VIOLATION",
            Self::BarValidationFailed => "BAR_VALIDATION_FAILED",
            Self::CorruptData => "CORRUPT_DATA",
            Self::ArchetypeInferenceFailed => "ARCHETYPE_INFERENCE_FAILED",
            Self::ArchetypeNotImplemented => "ARCHETYPE_NOT_IMPLEMENTED",
            Self::StrategyProvenanceViolation => "STRATEGY_PROVENANCE_VIOLATION",
            Self::InvalidStrategy => "INVALID_STRATEGY",
            Self::ZeroTradesGenerated => "ZERO_TRADES_GENERATED",
            Self::CalculationError => "CALCULATION_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::TransientError => "TRANSIENT_ERROR",
            Self::CacheMiss => "CACHE_MISS",
            Self::NoSignals => "NO_SIGNALS",
            Self::NoData => "NO_DATA",
        };
        write!(f, "{s}")
    }
}

/// Persisted on `BacktestSession.errorClassification` whenever a session
/// fails or emits a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub code: BacktestErrorCode,
    pub severity: Severity,
    pub should_halt: bool,
    pub message: String,
}

/// Map a backtest error code to its severity and halt behavior. This is the
/// single source of truth the executor consults on any pipeline failure —
/// see §4.2's "Error classification" step and §4.8's catalog.
pub fn classify(code: BacktestErrorCode, message: impl Into<String>) -> ErrorClassification {
    let (severity, should_halt) = match code {
        BacktestErrorCode::InstrumentNotSupported
        | BacktestErrorCode::DataProvenanceViolation
        | BacktestErrorCode::BarValidationFailed
        | BacktestErrorCode::CorruptData
        | BacktestErrorCode::ArchetypeInferenceFailed
        | BacktestErrorCode::ArchetypeNotImplemented
        | BacktestErrorCode::StrategyProvenanceViolation
        | BacktestErrorCode::InvalidStrategy
        | BacktestErrorCode::ZeroTradesGenerated
        | BacktestErrorCode::CalculationError
        | BacktestErrorCode::UnknownError => (Severity::Critical, true),
        BacktestErrorCode::TransientError | BacktestErrorCode::CacheMiss => (Severity::Recoverable, false),
        BacktestErrorCode::NoSignals | BacktestErrorCode::NoData => (Severity::Warning, false),
    };
    ErrorClassification {
        code,
        severity,
        should_halt,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_fail_codes_halt() {
        for code in [
            BacktestErrorCode::InstrumentNotSupported,
            BacktestErrorCode::DataProvenanceViolation,
            BacktestErrorCode::ZeroTradesGenerated,
            BacktestErrorCode::ArchetypeInferenceFailed,
        ] {
            let c = classify(code, "boom");
            assert!(c.should_halt);
            assert_eq!(c.severity, Severity::Critical);
        }
    }

    #[test]
    fn recoverable_codes_do_not_halt() {
        let c = classify(BacktestErrorCode::TransientError, "retry me");
        assert!(!c.should_halt);
        assert_eq!(c.severity, Severity::Recoverable);
    }

    #[test]
    fn warning_codes_are_informational() {
        let c = classify(BacktestErrorCode::NoSignals, "quiet day");
        assert_eq!(c.severity, Severity::Warning);
        assert!(!c.should_halt);
    }
}
