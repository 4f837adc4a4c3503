// src/llm/router.rs
// Maps a user-selected model name to backend adapter + parsing configuration

use crate::config::CONFIG;

/// Which adapter family a model routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Perplexity,
}

/// Where the text delta lives in each SSE chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    /// `choices[0].delta.content` (OpenAI-compatible and Perplexity).
    ChoicesDelta,
    /// `delta.text` (Anthropic Messages API).
    DeltaText,
}

/// Routing + parsing configuration for one backend. The router performs no
/// network calls; it only classifies the model name.
#[derive(Debug, Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub endpoint: String,
    pub chunk_format: ChunkFormat,
    /// Enables numbered `[n]` citation parsing and leading-reasoning extraction.
    pub citation_mode: bool,
}

impl Backend {
    /// Classify a model name. Unknown names fall back to the OpenAI-compatible
    /// default rather than erroring.
    pub fn select(model_name: &str) -> Backend {
        let name = model_name.to_lowercase();
        if name.contains("claude") {
            Backend {
                kind: BackendKind::Anthropic,
                endpoint: format!("{}/v1/messages", CONFIG.anthropic_base_url),
                chunk_format: ChunkFormat::DeltaText,
                citation_mode: false,
            }
        } else if name.contains("sonar") {
            Backend {
                kind: BackendKind::Perplexity,
                endpoint: format!("{}/chat/completions", CONFIG.perplexity_base_url),
                chunk_format: ChunkFormat::ChoicesDelta,
                citation_mode: true,
            }
        } else {
            Backend {
                kind: BackendKind::OpenAi,
                endpoint: format!("{}/v1/chat/completions", CONFIG.openai_base_url),
                chunk_format: ChunkFormat::ChoicesDelta,
                citation_mode: false,
            }
        }
    }
}
