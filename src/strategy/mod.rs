// =============================================================================
// Strategy layer — archetype resolution, derived rules, entry predicates
// =============================================================================

pub mod archetypes;
pub mod entry_conditions;
pub mod rules;
