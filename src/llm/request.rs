// src/llm/request.rs

use serde_json::{json, Value};

use crate::context::RequestContext;

/// Build the outbound JSON body shared by all three backends:
/// `{prompt, type, stream, model, context: {previousMessages, systemContext}}`.
pub fn build_request_body(model: &str, context: &RequestContext) -> Value {
    json!({
        "prompt": context.prompt,
        "type": "chat",
        "stream": true,
        "model": model,
        "context": {
            "previousMessages": context.previous_messages,
            "systemContext": context.system_context,
        },
    })
}
