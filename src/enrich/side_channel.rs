// src/enrich/side_channel.rs
// Incremental extraction of the delimited client-list block from model output

pub const START_MARKER: &str = "===CLIENTS===";
pub const END_MARKER: &str = "===END CLIENTS===";

#[derive(Debug, Clone, PartialEq)]
pub struct SideChannel {
    /// Prose before the start marker (the whole text when no block exists).
    pub main: String,
    /// Bullet items inside the block, prefixes stripped.
    pub entities: Vec<String>,
    /// True while the end marker has not arrived yet.
    pub still_extracting: bool,
}

/// Split main prose from the side-channel block.
///
/// Works incrementally on a growing accumulator: with the start marker seen
/// but no end marker, the partial list is returned with
/// `still_extracting = true` so the UI can show progressive results.
pub fn extract(text: &str) -> SideChannel {
    let Some(start) = text.find(START_MARKER) else {
        return SideChannel {
            main: text.to_string(),
            entities: Vec::new(),
            still_extracting: false,
        };
    };

    let main = text[..start].trim_end().to_string();
    let after = &text[start + START_MARKER.len()..];
    let (section, still_extracting) = match after.find(END_MARKER) {
        Some(end) => (&after[..end], false),
        None => (after, true),
    };

    let entities = section
        .lines()
        .filter_map(parse_bullet)
        .collect();

    SideChannel {
        main,
        entities,
        still_extracting,
    }
}

/// Strip a `-`, `*`, or numbered (`1.` / `1)`) bullet prefix. Lines without a
/// bullet prefix are not entities.
fn parse_bullet(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let rest = if let Some(rest) = trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('*')) {
        rest
    } else {
        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let after_digits = &trimmed[digits..];
        after_digits.strip_prefix('.').or_else(|| after_digits.strip_prefix(')'))?
    };
    let item = rest.trim();
    if item.is_empty() {
        None
    } else {
        Some(item.to_string())
    }
}
