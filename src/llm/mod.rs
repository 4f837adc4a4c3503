// src/llm/mod.rs

pub mod request;
pub mod router;
pub mod streaming;

pub use router::{Backend, BackendKind, ChunkFormat};
pub use streaming::{ChatClient, ChatEventStream, StreamEvent, StreamHandle, StreamSource};
