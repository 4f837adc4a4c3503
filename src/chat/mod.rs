// src/chat/mod.rs
// Conversation data model, UI-facing events, and the daily usage quota

pub mod conversation;

pub use conversation::{Conversation, Phase, SubmitInput};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;
use crate::lookup::Bill;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A reference to a legislative record named in response text.
/// Resolution fields are absent when the lookup found no match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub code: String,
    pub label: Option<String>,
    pub status: Option<String>,
    pub summary: Option<String>,
    /// Shared attribute used for related-entity resolution (committee name).
    pub group_key: Option<String>,
}

impl Citation {
    pub fn from_bill(bill: &Bill) -> Self {
        Citation {
            code: bill.code.to_uppercase(),
            label: Some(bill.title.clone()),
            status: Some(bill.status.clone()),
            summary: Some(bill.summary.clone()),
            group_key: bill.committee.clone(),
        }
    }
}

/// A numbered `[n]` marker resolved against a backend-provided source list.
/// Distinct mechanism from entity-code citations; the two are never conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberedCitation {
    pub index: usize,
    pub source: String,
}

/// Thinking segment extracted from a citation-mode stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub text: String,
    pub duration_ms: i64,
}

/// One turn in a conversation. Owned exclusively by the conversation that
/// created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: ChatRole,
    /// Authoritative once `is_streaming` is false; never mutated after that.
    pub content: String,
    /// Mutable accumulator used only while streaming.
    pub streamed_content: String,
    pub is_streaming: bool,
    pub citations: Vec<Citation>,
    pub related_entities: Vec<Citation>,
    pub numbered_citations: Vec<NumberedCitation>,
    pub reasoning: Option<Reasoning>,
    pub side_channel_entities: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: String) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::User,
            content,
            streamed_content: String::new(),
            is_streaming: false,
            citations: Vec::new(),
            related_entities: Vec::new(),
            numbered_citations: Vec::new(),
            reasoning: None,
            side_channel_entities: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant_placeholder() -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::Assistant,
            content: String::new(),
            streamed_content: String::new(),
            is_streaming: true,
            citations: Vec::new(),
            related_entities: Vec::new(),
            numbered_citations: Vec::new(),
            reasoning: None,
            side_channel_entities: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Events the conversation layer emits for rendering. Transport and parsing
/// stay decoupled from the UI behind this channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    Thinking { phrase: String },
    Delta { message_id: String, text: String },
    Reasoning { message_id: String, text: String },
    SideChannel {
        message_id: String,
        entities: Vec<String>,
        still_extracting: bool,
    },
    Settled { message_id: String, text: String },
    Citations {
        message_id: String,
        citations: Vec<Citation>,
    },
    NumberedCitations {
        message_id: String,
        citations: Vec<NumberedCitation>,
    },
    Related {
        message_id: String,
        entities: Vec<Citation>,
    },
    Canceled { message_id: String },
    Error { message: String },
}

/// Per-day word budget gating submission. Rolls over at UTC midnight.
#[derive(Debug)]
pub struct QuotaTracker {
    day: NaiveDate,
    used_words: usize,
    limit: usize,
}

impl QuotaTracker {
    pub fn new(limit: usize) -> Self {
        QuotaTracker {
            day: Utc::now().date_naive(),
            used_words: 0,
            limit,
        }
    }

    /// Pre-flight gate: consumes the submission's word count or refuses it.
    pub fn check_and_consume(&mut self, text: &str) -> Result<(), ChatError> {
        let today = Utc::now().date_naive();
        if today != self.day {
            self.day = today;
            self.used_words = 0;
        }
        let words = text.split_whitespace().count();
        if self.used_words + words > self.limit {
            return Err(ChatError::QuotaExceeded { limit: self.limit });
        }
        self.used_words += words;
        Ok(())
    }

    #[cfg(test)]
    fn backdate(&mut self, days: i64) {
        self.day -= chrono::Duration::days(days);
    }
}
