// src/llm/streaming/mod.rs

mod processor;

pub use processor::{process_sse, sse_data_stream, StreamEvent};

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{header, Client as ReqwestClient};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::CONFIG;
use crate::context::RequestContext;
use crate::error::ChatError;
use crate::llm::request::build_request_body;
use crate::llm::router::Backend;

pub type ChatEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Cancelable handle for one in-flight exchange. Aborting is cooperative: the
/// read loop observes the token and exits without emitting `Done`.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    token: CancellationToken,
}

impl StreamHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Seam between the conversation layer and the backend transport, so tests can
/// feed scripted streams through the same decoding path.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(
        &self,
        backend: &Backend,
        model: &str,
        context: &RequestContext,
        token: CancellationToken,
    ) -> Result<ChatEventStream, ChatError>;
}

/// HTTP stream source shared by all three backends.
pub struct ChatClient {
    http: ReqwestClient,
}

impl ChatClient {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let http = ReqwestClient::builder()
            .connect_timeout(Duration::from_secs(CONFIG.stream_connect_timeout))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Arc::new(Self { http }))
    }
}

#[async_trait]
impl StreamSource for ChatClient {
    async fn open(
        &self,
        backend: &Backend,
        model: &str,
        context: &RequestContext,
        token: CancellationToken,
    ) -> Result<ChatEventStream, ChatError> {
        if token.is_cancelled() {
            return Err(ChatError::Aborted);
        }

        let body = build_request_body(model, context);

        info!("opening chat stream: model={}, endpoint={}", model, backend.endpoint);

        let resp = self
            .http
            .post(&backend.endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {}", CONFIG.bearer_token))
            .header("x-api-key", &CONFIG.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::StreamTransport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(ChatError::StreamTransport(format!(
                "backend error ({}): {}",
                status, error_text
            )));
        }

        let bytes_stream = resp.bytes_stream().map(|r| r.map_err(anyhow::Error::from));
        let data = sse_data_stream(bytes_stream);
        let events = process_sse(data, backend.chunk_format, backend.citation_mode, token);
        Ok(Box::pin(events))
    }
}
