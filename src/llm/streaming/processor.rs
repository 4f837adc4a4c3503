// src/llm/streaming/processor.rs
// SSE framing and per-backend chunk decoding

use std::collections::VecDeque;

use anyhow::Result;
use bytes::Bytes;
use futures::stream::unfold;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::enrich::reasoning;
use crate::llm::router::ChunkFormat;

/// Events emitted while consuming a backend stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The full running text so far (the consumer accumulates, not the caller),
    /// plus any reasoning segment split off in citation mode.
    Delta {
        text: String,
        reasoning: Option<String>,
    },
    /// Graceful completion. Emitted exactly once, never after an abort.
    Done {
        text: String,
        reasoning: Option<String>,
        /// Source list for numbered `[n]` markers, when the backend sent one.
        sources: Vec<String>,
    },
    /// Transport failure after the stream opened. Content accumulated up to
    /// this point has already been delivered via `Delta`.
    Error { message: String },
}

/// Decode a raw byte stream into SSE `data:` payload strings.
///
/// Lines are newline-delimited; `event:`/`id:` lines and comments carry no
/// payload for these backends and are dropped here.
pub fn sse_data_stream(
    bytes_stream: impl Stream<Item = Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    let initial = (
        Box::pin(bytes_stream),
        String::new(),
        VecDeque::<String>::new(),
    );
    unfold(initial, |(mut stream, mut buffer, mut pending)| async move {
        loop {
            if let Some(payload) = pending.pop_front() {
                return Some((Ok(payload), (stream, buffer, pending)));
            }
            match stream.next().await {
                Some(Ok(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        let line = line.trim();
                        if line.is_empty() || line.starts_with(':') {
                            continue;
                        }
                        if let Some(data) = line.strip_prefix("data:") {
                            pending.push_back(data.trim().to_string());
                        }
                    }
                }
                Some(Err(e)) => {
                    return Some((Err(e), (stream, buffer, pending)));
                }
                None => {
                    // Flush a trailing unterminated data line
                    let line = buffer.trim().to_string();
                    buffer.clear();
                    if let Some(data) = line.strip_prefix("data:") {
                        pending.push_back(data.trim().to_string());
                        continue;
                    }
                    return None;
                }
            }
        }
    })
}

/// Extract the text delta from one decoded chunk per the backend wire format.
fn extract_delta(format: ChunkFormat, json: &Value) -> Option<String> {
    match format {
        ChunkFormat::ChoicesDelta => json["choices"][0]["delta"]["content"]
            .as_str()
            .map(str::to_string),
        ChunkFormat::DeltaText => json["delta"]["text"].as_str().map(str::to_string),
    }
}

/// Consume decoded SSE payloads into `StreamEvent`s.
///
/// A literal `[DONE]` payload or stream close terminates gracefully; malformed
/// lines are skipped, not fatal. Cancellation via `token` exits the loop
/// without emitting `Done` or `Error`.
pub fn process_sse(
    data_stream: impl Stream<Item = Result<String>> + Send + 'static,
    chunk_format: ChunkFormat,
    citation_mode: bool,
    token: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let mut data = Box::pin(data_stream);
        let mut acc = String::new();
        let mut sources: Vec<String> = Vec::new();
        loop {
            // Biased so the abort signal always wins over ready data; no
            // event may leak out once the caller has cancelled
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("stream aborted by caller after {} chars", acc.len());
                    return;
                }
                item = data.next() => item,
            };
            match next {
                Some(Ok(payload)) => {
                    if payload == "[DONE]" {
                        yield done_event(&acc, citation_mode, std::mem::take(&mut sources));
                        return;
                    }
                    let json: Value = match serde_json::from_str(&payload) {
                        Ok(v) => v,
                        Err(_) => {
                            debug!("skipping non-JSON SSE payload ({} bytes)", payload.len());
                            continue;
                        }
                    };
                    if let Some(list) = json.get("citations").and_then(|c| c.as_array()) {
                        sources = list
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                    }
                    let Some(delta) = extract_delta(chunk_format, &json) else {
                        continue;
                    };
                    if delta.is_empty() {
                        continue;
                    }
                    acc.push_str(&delta);
                    if citation_mode {
                        let split = reasoning::split_thinking(&acc);
                        yield StreamEvent::Delta {
                            text: split.content,
                            reasoning: split.reasoning,
                        };
                    } else {
                        yield StreamEvent::Delta { text: acc.clone(), reasoning: None };
                    }
                }
                Some(Err(e)) => {
                    warn!("stream transport error after {} chars: {}", acc.len(), e);
                    yield StreamEvent::Error { message: e.to_string() };
                    return;
                }
                None => {
                    yield done_event(&acc, citation_mode, std::mem::take(&mut sources));
                    return;
                }
            }
        }
    }
}

fn done_event(acc: &str, citation_mode: bool, sources: Vec<String>) -> StreamEvent {
    if citation_mode {
        let split = reasoning::split_thinking(acc);
        StreamEvent::Done {
            text: split.content,
            reasoning: split.reasoning,
            sources,
        }
    } else {
        StreamEvent::Done {
            text: acc.to_string(),
            reasoning: None,
            sources,
        }
    }
}
