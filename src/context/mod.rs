// src/context/mod.rs
// Builds the outbound request context: prompt synthesis, attachments,
// history window, and side-channel contract context

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::error::ChatError;
use crate::lookup::{Contract, LegislativeLookup};

/// A file the user attached to the prompt. `text` is `Some` only for plain
/// text files whose content the caller already read.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub text: Option<String>,
}

/// An entity the user multi-selected on the dashboard before asking.
#[derive(Debug, Clone)]
pub enum SelectedEntity {
    Bill { code: String },
    Legislator { name: String },
    Committee { name: String },
}

/// One prior turn included in the outbound history window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// Assembled payload handed to the stream consumer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub prompt: String,
    pub system_context: String,
    pub previous_messages: Vec<HistoryTurn>,
}

const DEFAULT_SYSTEM_CONTEXT: &str = "You are a research assistant for New York State \
legislation. Cite bills by their printed number (e.g. A00405, S256) so readers can \
follow up in the dashboard.";

pub struct ContextBuilder {
    lookup: Arc<dyn LegislativeLookup>,
}

impl ContextBuilder {
    pub fn new(lookup: Arc<dyn LegislativeLookup>) -> Self {
        Self { lookup }
    }

    /// Build the outbound request context.
    ///
    /// Fails with `EmptyInput` only when text, attachments, and selections are
    /// all empty after every synthesis step.
    pub fn build(
        &self,
        user_text: &str,
        attachments: &[Attachment],
        selected: &[SelectedEntity],
        history: &[HistoryTurn],
        system_override: Option<&str>,
    ) -> Result<RequestContext, ChatError> {
        let mut prompt = user_text.trim().to_string();

        if prompt.is_empty() && !selected.is_empty() {
            prompt = synthesize_selection_prompt(selected);
        }

        if !attachments.is_empty() {
            let section = attachment_section(attachments);
            if prompt.is_empty() {
                prompt = section;
            } else {
                prompt.push_str("\n\n");
                prompt.push_str(&section);
            }
        }

        if prompt.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let system_context = match system_override {
            Some(over) if !over.is_empty() => format!("{}\n\n{}", over, DEFAULT_SYSTEM_CONTEXT),
            _ => DEFAULT_SYSTEM_CONTEXT.to_string(),
        };

        // Bound payload size: most recent N turns, oldest-first within the window
        let cap = CONFIG.history_turn_cap;
        let start = history.len().saturating_sub(cap);
        let previous_messages = history[start..].to_vec();

        debug!(
            "assembled request: {} prompt chars, {} history turns",
            prompt.len(),
            previous_messages.len()
        );

        Ok(RequestContext {
            prompt,
            system_context,
            previous_messages,
        })
    }

    /// Assemble the contract side-channel context block: the named contract
    /// plus up to N siblings by vendor and by department. Any fetch failure
    /// degrades to `None`; submission never blocks on this.
    pub async fn contract_context(&self, contract_id: &str) -> Option<String> {
        let contract = match self.lookup.contract_by_id(contract_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                debug!("contract {} not found, skipping side-channel context", contract_id);
                return None;
            }
            Err(e) => {
                warn!("contract lookup failed for {}: {}", contract_id, e);
                return None;
            }
        };

        let limit = CONFIG.sibling_contract_limit;
        let by_vendor = self
            .lookup
            .contracts_by_vendor(&contract.vendor, limit)
            .await
            .unwrap_or_else(|e| {
                warn!("vendor sibling lookup failed: {}", e);
                Vec::new()
            });
        let by_department = self
            .lookup
            .contracts_by_department(&contract.department, limit)
            .await
            .unwrap_or_else(|e| {
                warn!("department sibling lookup failed: {}", e);
                Vec::new()
            });

        let mut block = String::from("Contract Details:\n");
        block.push_str(&format_contract(&contract));

        if !by_vendor.is_empty() {
            block.push_str(&format!("\nOther contracts with {}:\n", contract.vendor));
            for sibling in by_vendor.iter().filter(|c| c.id != contract.id) {
                block.push_str(&format_contract(sibling));
            }
        }
        if !by_department.is_empty() {
            block.push_str(&format!("\nOther {} contracts:\n", contract.department));
            for sibling in by_department.iter().filter(|c| c.id != contract.id) {
                block.push_str(&format_contract(sibling));
            }
        }

        Some(block)
    }
}

fn format_contract(contract: &Contract) -> String {
    format!(
        "- {} | {} | {} | ${:.2}\n",
        contract.id, contract.vendor, contract.description, contract.amount
    )
}

/// Turn a selection into a natural-language prompt, grouped by entity kind.
fn synthesize_selection_prompt(selected: &[SelectedEntity]) -> String {
    let mut bills = Vec::new();
    let mut legislators = Vec::new();
    let mut committees = Vec::new();
    for entity in selected {
        match entity {
            SelectedEntity::Bill { code } => bills.push(code.clone()),
            SelectedEntity::Legislator { name } => legislators.push(name.clone()),
            SelectedEntity::Committee { name } => committees.push(name.clone()),
        }
    }

    let mut parts = Vec::new();
    if !bills.is_empty() {
        let (noun, pronoun) = if bills.len() == 1 { ("bill", "its") } else { ("bills", "their") };
        parts.push(format!(
            "Tell me about {} {}, including {} status, sponsors, and details",
            noun,
            bills.join(", "),
            pronoun
        ));
    }
    if !legislators.is_empty() {
        let noun = if legislators.len() == 1 { "legislator" } else { "legislators" };
        parts.push(format!(
            "tell me about {} {}, including their party, district, and sponsored bills",
            noun,
            legislators.join(", ")
        ));
    }
    if !committees.is_empty() {
        let noun = if committees.len() == 1 { "committee" } else { "committees" };
        parts.push(format!(
            "tell me about the {} {}, including their members and active bills",
            noun,
            committees.join(", ")
        ));
    }

    let mut prompt = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            // First group keeps its own leading capital
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                prompt.push(first.to_ascii_uppercase());
                prompt.push_str(chars.as_str());
            }
        } else {
            prompt.push_str(". Also, ");
            prompt.push_str(part);
        }
    }
    prompt
}

/// Inline attachments under a labeled section. Plain text files are included
/// in full; everything else contributes only its shape.
fn attachment_section(attachments: &[Attachment]) -> String {
    let mut section = String::from("Attached Files:\n");
    for file in attachments {
        match &file.text {
            Some(content) => {
                section.push_str(&format!("--- {} ---\n{}\n", file.name, content));
            }
            None => {
                section.push_str(&format!(
                    "--- {} ({}, {} bytes) --- [content extraction not performed]\n",
                    file.name, file.mime, file.size
                ));
            }
        }
    }
    section
}
