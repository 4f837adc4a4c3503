// src/enrich/reasoning.rs
// Splits a leading model "thinking" segment from the main prose

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningSplit {
    /// Prose after the thinking segment (the whole text when no segment exists).
    pub content: String,
    pub reasoning: Option<String>,
    /// False while the close tag has not arrived yet (still streaming).
    pub complete: bool,
}

/// Split a leading `<think>…</think>` segment off the accumulated text.
///
/// Runs on every delta in citation mode, so it must behave sensibly on a
/// partial accumulator: an unterminated segment yields empty content and
/// `complete = false`.
pub fn split_thinking(text: &str) -> ReasoningSplit {
    let trimmed = text.trim_start();
    if !trimmed.starts_with(THINK_OPEN) {
        return ReasoningSplit {
            content: text.to_string(),
            reasoning: None,
            complete: true,
        };
    }

    let inner = &trimmed[THINK_OPEN.len()..];
    match inner.find(THINK_CLOSE) {
        Some(pos) => ReasoningSplit {
            content: inner[pos + THINK_CLOSE.len()..].trim_start().to_string(),
            reasoning: Some(inner[..pos].trim().to_string()),
            complete: true,
        },
        None => ReasoningSplit {
            content: String::new(),
            reasoning: Some(inner.trim().to_string()),
            complete: false,
        },
    }
}
