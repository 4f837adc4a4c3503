// src/chat/conversation.rs
// Conversation state machine: orchestrates assembly, streaming, enrichment,
// and persistence for one conversation at a time

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::{ChatEvent, Citation, Message, QuotaTracker, Reasoning};
use crate::config::CONFIG;
use crate::context::{Attachment, ContextBuilder, HistoryTurn, SelectedEntity};
use crate::enrich::{citations, side_channel};
use crate::error::ChatError;
use crate::llm::router::Backend;
use crate::llm::streaming::{StreamEvent, StreamHandle, StreamSource};
use crate::lookup::LegislativeLookup;
use crate::session::{LinkedEntity, SessionBridge};

/// Conversation lifecycle. `Canceled` and `Errored` are transient side exits
/// that return to `Idle` before `submit` resolves, so they are not observable
/// phases here; callers see them as `ChatEvent`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Streaming,
    Settling,
}

/// One user submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitInput {
    pub text: String,
    pub model: Option<String>,
    pub attachments: Vec<Attachment>,
    pub selected: Vec<SelectedEntity>,
    pub system_override: Option<String>,
    /// Invocation from a contract page; triggers side-channel context assembly.
    pub contract_id: Option<String>,
}

impl SubmitInput {
    pub fn text(text: impl Into<String>) -> Self {
        SubmitInput {
            text: text.into(),
            ..Default::default()
        }
    }
}

const ERROR_NOTICE: &str =
    "Sorry, I encountered an error while responding. Please try again.";

const THINKING_PHRASES: [&str; 5] = [
    "Reading the bill text...",
    "Checking committee records...",
    "Scanning the session calendar...",
    "Cross-referencing sponsors...",
    "Reviewing recent votes...",
];

pub struct Conversation {
    source: Arc<dyn StreamSource>,
    lookup: Arc<dyn LegislativeLookup>,
    bridge: Arc<SessionBridge>,
    assembler: ContextBuilder,

    messages: Arc<Mutex<Vec<Message>>>,
    phase: Mutex<Phase>,
    session_id: Mutex<Option<i64>>,
    linked_entity: Mutex<Option<LinkedEntity>>,
    abort: Mutex<Option<StreamHandle>>,
    quota: Mutex<QuotaTracker>,
    /// Bumped on new-chat/load-session; stale fire-and-forget settlement
    /// tasks compare against it and abandon their patch.
    epoch: Arc<AtomicU64>,
    /// Rotating thinking-phrase index, advanced per assistant message.
    thinking_idx: AtomicUsize,
    event_tx: mpsc::Sender<ChatEvent>,
}

impl Conversation {
    pub fn new(
        source: Arc<dyn StreamSource>,
        lookup: Arc<dyn LegislativeLookup>,
        bridge: Arc<SessionBridge>,
        linked_entity: Option<LinkedEntity>,
    ) -> (Arc<Self>, mpsc::Receiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let conversation = Arc::new(Conversation {
            source,
            lookup: lookup.clone(),
            bridge,
            assembler: ContextBuilder::new(lookup),
            messages: Arc::new(Mutex::new(Vec::new())),
            phase: Mutex::new(Phase::Idle),
            session_id: Mutex::new(None),
            linked_entity: Mutex::new(linked_entity),
            abort: Mutex::new(None),
            quota: Mutex::new(QuotaTracker::new(CONFIG.daily_word_limit)),
            epoch: Arc::new(AtomicU64::new(0)),
            thinking_idx: AtomicUsize::new(0),
            event_tx,
        });
        (conversation, event_rx)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn session_id(&self) -> Option<i64> {
        *self.session_id.lock().unwrap()
    }

    /// Abort the in-flight exchange, if any. Cooperative: the read loop
    /// observes the signal and winds down without an error notice.
    pub fn stop(&self) {
        if let Some(handle) = self.abort.lock().unwrap().as_ref() {
            if !handle.is_aborted() {
                info!("canceling in-flight exchange");
                handle.abort();
            }
        }
    }

    /// Reset to a fresh conversation, aborting any in-flight stream first.
    pub fn new_chat(&self) {
        self.stop();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().clear();
        *self.session_id.lock().unwrap() = None;
        *self.phase.lock().unwrap() = Phase::Idle;
    }

    /// Replace in-memory state with a persisted session. Message state is
    /// cleared before loading so no cross-session content can bleed through.
    pub async fn load_session(&self, session_id: i64) -> bool {
        self.stop();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().clear();
        *self.session_id.lock().unwrap() = None;
        *self.phase.lock().unwrap() = Phase::Idle;

        match self.bridge.load_session(session_id).await {
            Some(loaded) => {
                *self.messages.lock().unwrap() = loaded;
                *self.session_id.lock().unwrap() = Some(session_id);
                true
            }
            None => false,
        }
    }

    /// Run one exchange end to end. A submission while another exchange is in
    /// flight is rejected as a no-op; the message list is left untouched.
    pub async fn submit(self: &Arc<Self>, input: SubmitInput) -> Result<(), ChatError> {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase != Phase::Idle {
                warn!("submission rejected: exchange already in flight");
                return Ok(());
            }
            // Pre-flight gates run before the transition: a refused
            // submission leaves the machine exactly where it was
            if input.text.trim().is_empty()
                && input.attachments.is_empty()
                && input.selected.is_empty()
            {
                return Err(ChatError::EmptyInput);
            }
            self.quota.lock().unwrap().check_and_consume(&input.text)?;
            *phase = Phase::Submitting;
        }

        let entry_epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.run_exchange(input, entry_epoch).await;

        // A reset replaced this exchange mid-flight; the new exchange owns
        // the abort slot and phase now, leave them alone
        if self.epoch.load(Ordering::SeqCst) == entry_epoch {
            self.abort.lock().unwrap().take();
            *self.phase.lock().unwrap() = Phase::Idle;
        }
        result
    }

    async fn run_exchange(
        self: &Arc<Self>,
        input: SubmitInput,
        entry_epoch: u64,
    ) -> Result<(), ChatError> {
        let history: Vec<HistoryTurn> = {
            let msgs = self.messages.lock().unwrap();
            msgs.iter()
                .filter(|m| !m.is_streaming)
                .map(|m| HistoryTurn {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect()
        };

        // Side-channel contract context folds into the system override;
        // failure to fetch never blocks submission
        let mut system_override = input.system_override.clone();
        if let Some(contract_id) = &input.contract_id {
            if let Some(block) = self.assembler.contract_context(contract_id).await {
                system_override = Some(match system_override {
                    Some(existing) => format!("{}\n\n{}", existing, block),
                    None => block,
                });
            }
        }

        let context = self.assembler.build(
            &input.text,
            &input.attachments,
            &input.selected,
            &history,
            system_override.as_deref(),
        )?;

        // Lazy session creation on the first user message
        let needs_session = {
            self.messages.lock().unwrap().is_empty() && self.session_id.lock().unwrap().is_none()
        };
        if needs_session {
            let linked = self.linked_entity.lock().unwrap().clone();
            if let Some(id) = self.bridge.ensure_session(&context.prompt, linked.as_ref()).await {
                *self.session_id.lock().unwrap() = Some(id);
            }
        }

        let assistant_id = {
            let user = Message::user(context.prompt.clone());
            let assistant = Message::assistant_placeholder();
            let id = assistant.id.clone();
            let mut msgs = self.messages.lock().unwrap();
            msgs.push(user);
            msgs.push(assistant);
            id
        };

        let idx = self.thinking_idx.fetch_add(1, Ordering::SeqCst);
        let phrase = THINKING_PHRASES[idx % THINKING_PHRASES.len()].to_string();
        let _ = self.event_tx.send(ChatEvent::Thinking { phrase }).await;

        let model = input
            .model
            .clone()
            .unwrap_or_else(|| CONFIG.default_model.clone());
        let backend = Backend::select(&model);
        let token = CancellationToken::new();
        *self.abort.lock().unwrap() = Some(StreamHandle::new(token.clone()));
        *self.phase.lock().unwrap() = Phase::Streaming;

        let mut stream = match self
            .source
            .open(&backend, &model, &context, token.clone())
            .await
        {
            Ok(stream) => stream,
            Err(ChatError::Aborted) => {
                debug!("exchange aborted before the stream opened");
                self.finalize_message(&assistant_id, "", None, 0);
                let _ = self
                    .event_tx
                    .send(ChatEvent::Canceled {
                        message_id: assistant_id.clone(),
                    })
                    .await;
                return Ok(());
            }
            Err(e) => {
                warn!("failed to open stream: {}", e);
                self.finalize_errored(&assistant_id, String::new()).await;
                return Ok(());
            }
        };

        let mut last_text = String::new();
        let mut last_reasoning: Option<String> = None;
        let mut reasoning_started: Option<Instant> = None;
        let mut reasoning_duration_ms: i64 = 0;
        let mut done: Option<(String, Option<String>, Vec<String>)> = None;
        let mut errored = false;

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta { text, reasoning } => {
                    if reasoning.is_some() && reasoning_started.is_none() {
                        reasoning_started = Some(Instant::now());
                    }
                    if let Some(started) = reasoning_started {
                        if !text.is_empty() && reasoning_duration_ms == 0 {
                            reasoning_duration_ms = started.elapsed().as_millis() as i64;
                        }
                    }

                    let sc = side_channel::extract(&text);
                    let has_block = text.len() != sc.main.len() || sc.still_extracting;
                    {
                        let mut msgs = self.messages.lock().unwrap();
                        if let Some(msg) = msgs.iter_mut().find(|m| m.id == assistant_id) {
                            msg.streamed_content = text.clone();
                            if has_block {
                                msg.side_channel_entities = sc.entities.clone();
                            }
                        }
                    }
                    let _ = self
                        .event_tx
                        .send(ChatEvent::Delta {
                            message_id: assistant_id.clone(),
                            text: sc.main.clone(),
                        })
                        .await;
                    if has_block {
                        let _ = self
                            .event_tx
                            .send(ChatEvent::SideChannel {
                                message_id: assistant_id.clone(),
                                entities: sc.entities.clone(),
                                still_extracting: sc.still_extracting,
                            })
                            .await;
                    }
                    if let Some(r) = &reasoning {
                        let _ = self
                            .event_tx
                            .send(ChatEvent::Reasoning {
                                message_id: assistant_id.clone(),
                                text: r.clone(),
                            })
                            .await;
                    }
                    last_text = text;
                    last_reasoning = reasoning;
                }
                StreamEvent::Done { text, reasoning, sources } => {
                    done = Some((text, reasoning, sources));
                    break;
                }
                StreamEvent::Error { message } => {
                    warn!("stream errored after {} chars: {}", last_text.len(), message);
                    errored = true;
                    break;
                }
            }
        }

        // A reset superseded this exchange while the loop ran: its message
        // list is gone and the abort slot belongs to the next exchange, so
        // there is nothing left to settle or announce
        if self.epoch.load(Ordering::SeqCst) != entry_epoch {
            debug!("exchange superseded by a reset; abandoning teardown");
            return Ok(());
        }

        self.abort.lock().unwrap().take();

        if let Some((text, reasoning, sources)) = done {
            self.settle(
                &assistant_id,
                &backend,
                text,
                reasoning,
                sources,
                reasoning_duration_ms,
            )
            .await;
            return Ok(());
        }

        if errored {
            // Partial content is retained; the notice only covers an empty stream
            self.finalize_errored(&assistant_id, last_text).await;
            return Ok(());
        }

        // Neither done nor errored: the abort signal ended the read loop
        debug!("exchange canceled with {} chars received", last_text.len());
        self.finalize_message(&assistant_id, &last_text, last_reasoning, reasoning_duration_ms);
        let _ = self
            .event_tx
            .send(ChatEvent::Canceled {
                message_id: assistant_id.clone(),
            })
            .await;
        Ok(())
    }

    /// Enrichment + persistence after graceful completion. Primary citations
    /// resolve before the related pass; related + persistence run
    /// fire-and-forget and tolerate the machine already being idle.
    async fn settle(
        self: &Arc<Self>,
        assistant_id: &str,
        backend: &Backend,
        text: String,
        reasoning: Option<String>,
        sources: Vec<String>,
        reasoning_duration_ms: i64,
    ) {
        *self.phase.lock().unwrap() = Phase::Settling;

        let content = self.finalize_message(assistant_id, &text, reasoning, reasoning_duration_ms);
        let _ = self
            .event_tx
            .send(ChatEvent::Settled {
                message_id: assistant_id.to_string(),
                text: content.clone(),
            })
            .await;

        let resolved = citations::resolve_citations(self.lookup.as_ref(), &content).await;
        let numbered = if backend.citation_mode {
            citations::resolve_numbered(&content, &sources)
        } else {
            Vec::new()
        };
        {
            let mut msgs = self.messages.lock().unwrap();
            if let Some(msg) = msgs.iter_mut().find(|m| m.id == assistant_id) {
                msg.citations = resolved.clone();
                msg.numbered_citations = numbered.clone();
            }
        }
        if !resolved.is_empty() {
            let _ = self
                .event_tx
                .send(ChatEvent::Citations {
                    message_id: assistant_id.to_string(),
                    citations: resolved.clone(),
                })
                .await;
        }
        if !numbered.is_empty() {
            let _ = self
                .event_tx
                .send(ChatEvent::NumberedCitations {
                    message_id: assistant_id.to_string(),
                    citations: numbered,
                })
                .await;
        }

        self.spawn_late_settlement(assistant_id.to_string(), resolved);
    }

    /// Copy the accumulator into `content` and stop streaming. `content` is
    /// authoritative from here on.
    fn finalize_message(
        &self,
        assistant_id: &str,
        text: &str,
        reasoning: Option<String>,
        reasoning_duration_ms: i64,
    ) -> String {
        let sc = side_channel::extract(text);
        let mut msgs = self.messages.lock().unwrap();
        if let Some(msg) = msgs.iter_mut().find(|m| m.id == assistant_id) {
            msg.content = sc.main.clone();
            msg.side_channel_entities = sc.entities;
            msg.is_streaming = false;
            if let Some(r) = reasoning {
                if !r.is_empty() {
                    msg.reasoning = Some(Reasoning {
                        text: r,
                        duration_ms: reasoning_duration_ms,
                    });
                }
            }
        }
        sc.main
    }

    async fn finalize_errored(&self, assistant_id: &str, partial: String) {
        let had_content = !partial.is_empty();
        {
            let mut msgs = self.messages.lock().unwrap();
            if let Some(msg) = msgs.iter_mut().find(|m| m.id == assistant_id) {
                msg.content = if had_content {
                    side_channel::extract(&partial).main
                } else {
                    ERROR_NOTICE.to_string()
                };
                msg.is_streaming = false;
            }
        }
        let _ = self
            .event_tx
            .send(ChatEvent::Error {
                message: "encountered an error".to_string(),
            })
            .await;
    }

    /// Related-entity resolution and session persistence, detached from the
    /// state machine. Abandons its patch when the conversation was reset or
    /// the message replaced in the meantime.
    fn spawn_late_settlement(self: &Arc<Self>, assistant_id: String, primary: Vec<Citation>) {
        let lookup = self.lookup.clone();
        let bridge = self.bridge.clone();
        let messages = self.messages.clone();
        let event_tx = self.event_tx.clone();
        let session_id = *self.session_id.lock().unwrap();
        let epoch = self.epoch.clone();
        let observed_epoch = epoch.load(Ordering::SeqCst);

        tokio::spawn(async move {
            let related =
                citations::related_for(lookup.as_ref(), &primary, CONFIG.related_entity_limit)
                    .await;

            if epoch.load(Ordering::SeqCst) != observed_epoch {
                debug!("abandoning late settlement for a stale exchange");
                return;
            }

            let snapshot = {
                let mut msgs = messages.lock().unwrap();
                let Some(msg) = msgs.iter_mut().find(|m| m.id == assistant_id) else {
                    return;
                };
                if !related.is_empty() {
                    msg.related_entities = related.clone();
                }
                msgs.clone()
            };

            if !related.is_empty() {
                let _ = event_tx
                    .send(ChatEvent::Related {
                        message_id: assistant_id,
                        entities: related,
                    })
                    .await;
            }

            if let Some(id) = session_id {
                bridge.append_exchange(id, &snapshot).await;
            }
        });
    }
}
