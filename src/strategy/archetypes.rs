// =============================================================================
// Strategy archetypes — named strategy families and entry-condition mapping
// =============================================================================
//
// An archetype is a short, fixed id (`gap_fade`, `breakout`, ...) that maps
// onto exactly one of the nine canonical entry-condition types. Resolution
// order (§4.2 step 5): a bot's stored `archetypeId` wins outright; failing
// that, an explicit `config.archetype` string; failing that, inference from
// the bot's human name via canonical normalization. No silent default —
// an unresolvable name is a hard failure, not a guess.
// =============================================================================

use crate::instruments;
use crate::types::EntryConditionType;

/// One archetype's identity plus the entry-condition family it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Archetype {
    pub id: &'static str,
    pub entry_condition: EntryConditionType,
}

pub const ARCHETYPES: &[Archetype] = &[
    Archetype { id: "breakout", entry_condition: EntryConditionType::Breakout },
    Archetype { id: "mean_reversion", entry_condition: EntryConditionType::MeanReversion },
    Archetype { id: "vwap_touch", entry_condition: EntryConditionType::VwapTouch },
    Archetype { id: "trend_continuation", entry_condition: EntryConditionType::TrendContinuation },
    Archetype { id: "gap_fade", entry_condition: EntryConditionType::GapFade },
    Archetype { id: "gap_fill", entry_condition: EntryConditionType::GapFill },
    Archetype { id: "reversal", entry_condition: EntryConditionType::Reversal },
    Archetype { id: "range_scalp", entry_condition: EntryConditionType::RangeScalp },
    Archetype { id: "momentum_surge", entry_condition: EntryConditionType::MomentumSurge },
];

/// Alias phrase (lowercase, space-separated) → archetype id. Checked as a
/// substring against the normalized bot name, longest alias first so a more
/// specific phrase (`"gap fill"`) wins over a looser one (`"gap"`) when both
/// would otherwise match.
const ALIASES: &[(&str, &str)] = &[
    ("gap fade", "gap_fade"),
    ("gap fill", "gap_fill"),
    ("mean reversion", "mean_reversion"),
    ("trend continuation", "trend_continuation"),
    ("range scalp", "range_scalp"),
    ("momentum surge", "momentum_surge"),
    ("vwap touch", "vwap_touch"),
    ("reversion", "mean_reversion"),
    ("breakout", "breakout"),
    ("vwap", "vwap_touch"),
    ("trend", "trend_continuation"),
    ("continuation", "trend_continuation"),
    ("reversal", "reversal"),
    ("scalp", "range_scalp"),
    ("momentum", "momentum_surge"),
    ("surge", "momentum_surge"),
    ("fade", "gap_fade"),
    ("fill", "gap_fill"),
];

pub fn lookup(archetype_id: &str) -> Option<&'static Archetype> {
    ARCHETYPES.iter().find(|a| a.id == archetype_id)
}

/// Resolve an archetype id from a bot's human name. Returns `None` if no
/// alias can be matched after every normalization attempt, per §4.2 step 5
/// ("no silent breakout default").
pub fn infer_from_name(name: &str) -> Option<&'static str> {
    let normalized = normalize(name);

    if let Some(id) = match_aliases(&normalized) {
        return Some(id);
    }

    // Retry after splitting on whitespace and skipping the first token (the
    // first word is often a proper noun / callsign, e.g. "Zephyr Gap Fade").
    let mut tokens = normalized.split_whitespace();
    if tokens.next().is_some() {
        let rest: String = tokens.collect::<Vec<_>>().join(" ");
        if !rest.is_empty() {
            if let Some(id) = match_aliases(&rest) {
                return Some(id);
            }
        }
    }

    None
}

/// Lowercase and strip a leading instrument symbol token (e.g. `"MNQ Gap
/// Fade"` → `"gap fade"`), since instrument prefixes are not part of the
/// strategy name itself.
fn normalize(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut tokens: Vec<&str> = lower.split_whitespace().collect();
    if let Some(first) = tokens.first() {
        if instruments::is_supported(&first.to_uppercase()) {
            tokens.remove(0);
        }
    }
    tokens.join(" ")
}

fn match_aliases(haystack: &str) -> Option<&'static str> {
    let mut best: Option<(&'static str, usize)> = None;
    for (alias, id) in ALIASES {
        if haystack.contains(alias) {
            let len = alias.len();
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((id, len));
            }
        }
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_gap_fade_with_instrument_prefix_stripped() {
        assert_eq!(infer_from_name("MNQ Gap Fade"), Some("gap_fade"));
    }

    #[test]
    fn infers_from_second_token_when_first_is_a_callsign() {
        assert_eq!(infer_from_name("Zephyr Gap Fade"), Some("gap_fade"));
    }

    #[test]
    fn unresolvable_name_returns_none() {
        assert_eq!(infer_from_name("Zephyr Strategy 42"), None);
    }

    #[test]
    fn longer_alias_wins_over_shorter_substring() {
        // "gap fill" should win over the looser "fill" and "fade" aliases.
        assert_eq!(infer_from_name("ES Gap Fill Bot"), Some("gap_fill"));
    }

    #[test]
    fn every_archetype_maps_to_a_distinct_entry_condition() {
        let mut seen = std::collections::HashSet::new();
        for a in ARCHETYPES {
            assert!(seen.insert(a.entry_condition), "duplicate entry condition for {}", a.id);
        }
    }

    #[test]
    fn lookup_finds_known_archetype() {
        assert!(lookup("breakout").is_some());
        assert!(lookup("not_a_real_archetype").is_none());
    }
}
