// src/enrich/mod.rs
// Progressive enrichment: citation resolution, side-channel extraction,
// and reasoning-segment handling over streamed text

pub mod citations;
pub mod reasoning;
pub mod side_channel;

pub use citations::{extract_codes, related_for, resolve_citations, resolve_numbered};
pub use reasoning::{split_thinking, ReasoningSplit};
pub use side_channel::SideChannel;
