// =============================================================================
// Bot Creation Validator — composite SEV-tagged checks, §4.8
// =============================================================================
//
// Aggregates every check a new bot must pass before it is admitted at
// TRIALS: instrument support, archetype resolvability, risk-config shape,
// per-trade contract ceiling, and session-mode sanity. Any SEV-0 finding
// blocks creation outright; SEV-1/SEV-2 findings are returned alongside so
// the caller can decide whether to warn or still block for non-TRIALS
// stages, matching the teacher's pattern of returning the full error list
// rather than failing fast on the first problem.
// =============================================================================

use crate::config::MaxContractsByStage;
use crate::domain::RiskConfig;
use crate::errors::{Sev, SevError};
use crate::instruments;
use crate::strategy::archetypes;
use crate::types::{SessionMode, Stage};

pub struct BotCreationRequest<'a> {
    pub name: &'a str,
    pub symbol: &'a str,
    pub archetype_id: Option<&'a str>,
    pub risk_config: &'a RiskConfig,
    pub session_mode: SessionMode,
}

pub struct ValidationOutcome {
    pub errors: Vec<SevError>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        !self.errors.iter().any(|e| e.sev == Sev::Sev0)
    }
}

/// Resolve the archetype the same way the backtest executor's step 5 does:
/// stored id wins, else inference from the name. Returns the resolved id so
/// callers can persist it, or `None` plus a SEV-0 finding if unresolvable.
pub fn resolve_archetype(name: &str, archetype_id: Option<&str>) -> Result<&'static str, SevError> {
    if let Some(id) = archetype_id {
        if archetypes::lookup(id).is_some() {
            return Ok(id_to_static(id));
        }
        return Err(SevError::new("ARCHETYPE_NOT_FOUND", "archetype_id", format!("unknown archetype id '{id}'"), Sev::Sev0));
    }
    archetypes::infer_from_name(name).ok_or_else(|| {
        SevError::new("ARCHETYPE_INFERENCE_FAILED", "name", "could not infer an archetype from the bot name", Sev::Sev0)
    })
}

fn id_to_static(id: &str) -> &'static str {
    archetypes::lookup(id).map(|a| a.id).unwrap_or("unknown")
}

fn validate_symbol(symbol: &str, errors: &mut Vec<SevError>) {
    if !instruments::is_supported(&symbol.to_uppercase()) {
        errors.push(SevError::new("INSTRUMENT_NOT_SUPPORTED", "symbol", format!("'{symbol}' is not a supported instrument"), Sev::Sev0));
    }
}

fn validate_archetype(name: &str, archetype_id: Option<&str>, errors: &mut Vec<SevError>) {
    if let Err(e) = resolve_archetype(name, archetype_id) {
        errors.push(e);
    }
}

fn validate_risk_config(risk_config: &RiskConfig, max_contracts: &MaxContractsByStage, errors: &mut Vec<SevError>) {
    if risk_config.stop_loss_ticks <= 0 {
        errors.push(SevError::new("INVALID_STOP_LOSS", "risk_config.stop_loss_ticks", "stop_loss_ticks must be positive", Sev::Sev0));
    }
    if risk_config.max_position_size == 0 {
        errors.push(SevError::new("INVALID_POSITION_SIZE", "risk_config.max_position_size", "max_position_size must be at least 1", Sev::Sev0));
    }
    let trials_ceiling = max_contracts.for_stage(Stage::Trials);
    if risk_config.max_position_size > trials_ceiling {
        errors.push(SevError::new(
            "POSITION_SIZE_EXCEEDS_STAGE_CEILING",
            "risk_config.max_position_size",
            format!("max_position_size {} exceeds TRIALS ceiling {trials_ceiling}", risk_config.max_position_size),
            Sev::Sev1,
        ));
    }
}

fn validate_session_mode(session_mode: SessionMode, symbol: &str, errors: &mut Vec<SevError>) {
    // Metals and energies don't observe the US cash-equity RTH window the
    // way index futures do; flag it as a SEV-2 so it's visible without
    // blocking creation.
    if matches!(session_mode, SessionMode::RthUs) && matches!(symbol.to_uppercase().as_str(), "CL" | "GC") {
        errors.push(SevError::new(
            "SESSION_MODE_MISMATCH",
            "session_mode",
            format!("{symbol} typically trades outside the US cash-equity RTH window; confirm RTH_US is intended"),
            Sev::Sev2,
        ));
    }
}

fn validate_name(name: &str, errors: &mut Vec<SevError>) {
    if name.trim().is_empty() {
        errors.push(SevError::new("MISSING_NAME", "name", "bot name must not be empty", Sev::Sev0));
    }
}

/// Run every check and return the full finding list. Any SEV-0 finding means
/// `is_valid()` is false and creation must be rejected.
pub fn validate_bot_creation(req: &BotCreationRequest, max_contracts: &MaxContractsByStage) -> ValidationOutcome {
    let mut errors = Vec::new();

    validate_name(req.name, &mut errors);
    validate_symbol(req.symbol, &mut errors);
    validate_archetype(req.name, req.archetype_id, &mut errors);
    validate_risk_config(req.risk_config, max_contracts, &mut errors);
    validate_session_mode(req.session_mode, req.symbol, &mut errors);

    ValidationOutcome { errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk(stop_loss_ticks: i64, max_position_size: u32) -> RiskConfig {
        RiskConfig { stop_loss_ticks, max_position_size }
    }

    #[test]
    fn valid_request_passes() {
        let req = BotCreationRequest {
            name: "MES Gap Fade",
            symbol: "MES",
            archetype_id: None,
            risk_config: &risk(20, 2),
            session_mode: SessionMode::RthUs,
        };
        let outcome = validate_bot_creation(&req, &MaxContractsByStage::default());
        assert!(outcome.is_valid(), "{:?}", outcome.errors.iter().map(|e| &e.code).collect::<Vec<_>>());
    }

    #[test]
    fn unsupported_symbol_is_sev0() {
        let req = BotCreationRequest {
            name: "Zephyr Gap Fade",
            symbol: "ZEPHYR",
            archetype_id: None,
            risk_config: &risk(20, 2),
            session_mode: SessionMode::RthUs,
        };
        let outcome = validate_bot_creation(&req, &MaxContractsByStage::default());
        assert!(!outcome.is_valid());
        assert!(outcome.errors.iter().any(|e| e.code == "INSTRUMENT_NOT_SUPPORTED"));
    }

    #[test]
    fn unresolvable_archetype_blocks_creation() {
        let req = BotCreationRequest {
            name: "Zephyr Strategy 42",
            symbol: "MES",
            archetype_id: None,
            risk_config: &risk(20, 2),
            session_mode: SessionMode::RthUs,
        };
        let outcome = validate_bot_creation(&req, &MaxContractsByStage::default());
        assert!(!outcome.is_valid());
        assert!(outcome.errors.iter().any(|e| e.code == "ARCHETYPE_INFERENCE_FAILED"));
    }

    #[test]
    fn oversized_position_relative_to_trials_ceiling_is_sev1_not_blocking() {
        let req = BotCreationRequest {
            name: "MES Breakout",
            symbol: "MES",
            archetype_id: None,
            risk_config: &risk(20, 999),
            session_mode: SessionMode::RthUs,
        };
        let outcome = validate_bot_creation(&req, &MaxContractsByStage::default());
        assert!(outcome.is_valid());
        assert!(outcome.errors.iter().any(|e| e.code == "POSITION_SIZE_EXCEEDS_STAGE_CEILING" && e.sev == Sev::Sev1));
    }
}
