// src/enrich/citations.rs
// Entity-code scanning and resolution against the lookup collaborator

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::chat::{Citation, NumberedCitation};
use crate::lookup::LegislativeLookup;

// One routing letter (Assembly, Senate, and the joint/budget prefixes) + digits
static ENTITY_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[ASJKBECRL]\d+\b").expect("valid entity code pattern"));

static NUMBERED_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid numbered marker pattern"));

/// Scan text for entity codes, deduplicated by normalized uppercase code,
/// first-seen order preserved.
pub fn extract_codes(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for found in ENTITY_CODE_RE.find_iter(text) {
        let code = found.as_str().to_uppercase();
        if !seen.contains(&code) {
            seen.push(code);
        }
    }
    seen
}

/// Resolve primary citations: one batched lookup, misses dropped silently,
/// extraction order preserved. Lookup failure degrades to an empty result.
pub async fn resolve_citations(lookup: &dyn LegislativeLookup, text: &str) -> Vec<Citation> {
    let codes = extract_codes(text);
    if codes.is_empty() {
        return Vec::new();
    }
    let bills = match lookup.bills_by_codes(&codes).await {
        Ok(bills) => bills,
        Err(e) => {
            warn!("citation lookup failed for {} codes: {}", codes.len(), e);
            return Vec::new();
        }
    };
    debug!("resolved {} of {} cited codes", bills.len(), codes.len());

    codes
        .iter()
        .filter_map(|code| {
            bills
                .iter()
                .find(|b| b.code.to_uppercase() == *code)
                .map(Citation::from_bill)
        })
        .collect()
}

/// Resolve related entities from the first primary citation carrying a group
/// key. Later citations are ignored deliberately; runs only after primary
/// resolution.
pub async fn related_for(
    lookup: &dyn LegislativeLookup,
    citations: &[Citation],
    limit: usize,
) -> Vec<Citation> {
    let Some(primary) = citations.iter().find(|c| c.group_key.is_some()) else {
        return Vec::new();
    };
    let committee = primary.group_key.as_deref().unwrap_or_default();
    match lookup.bills_by_committee(committee, &primary.code, limit).await {
        Ok(bills) => bills.iter().map(Citation::from_bill).collect(),
        Err(e) => {
            warn!("related-entity lookup failed for {}: {}", committee, e);
            Vec::new()
        }
    }
}

/// Resolve numbered `[n]` markers against the backend-provided source list.
/// This is a distinct mechanism from entity-code citations.
pub fn resolve_numbered(text: &str, sources: &[String]) -> Vec<NumberedCitation> {
    let mut seen = Vec::new();
    let mut resolved = Vec::new();
    for capture in NUMBERED_MARKER_RE.captures_iter(text) {
        let Ok(index) = capture[1].parse::<usize>() else {
            continue;
        };
        if index == 0 || index > sources.len() || seen.contains(&index) {
            continue;
        }
        seen.push(index);
        resolved.push(NumberedCitation {
            index,
            source: sources[index - 1].clone(),
        });
    }
    resolved
}
