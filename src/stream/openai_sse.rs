// OpenAI SSE framer: normalized events → chat.completion.chunk frames.

use serde_json::{json, Value};

use super::KiroEvent;
use crate::config::ReasoningHandling;
use crate::convert::ToolCall;
use crate::error::{error_json, ErrorType};

/// Stateful chunk framer; one per streaming response.
pub struct OpenAiSseFramer {
    id: String,
    model: String,
    created: i64,
    chunk_index: u64,
    tool_call_index: u64,
    has_tool_calls: bool,
    reasoning_handling: ReasoningHandling,
}

impl OpenAiSseFramer {
    pub fn new(id: &str, model: &str, reasoning_handling: ReasoningHandling) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            chunk_index: 0,
            tool_call_index: 0,
            has_tool_calls: false,
            reasoning_handling,
        }
    }

    /// Frame one normalized event. Returns `None` for events that produce
    /// no client-visible chunk.
    pub fn process_event(&mut self, event: &KiroEvent) -> Option<String> {
        self.chunk_index += 1;
        match event {
            KiroEvent::Content(text) if !text.is_empty() => {
                Some(self.delta_chunk(json!({"content": text}), None))
            }
            KiroEvent::Thinking { text, .. }
                if !text.is_empty()
                    && self.reasoning_handling == ReasoningHandling::AsReasoningContent =>
            {
                Some(self.delta_chunk(json!({"reasoning_content": text}), None))
            }
            KiroEvent::ToolUse(tc) => {
                self.has_tool_calls = true;
                let chunk = self.delta_chunk(
                    json!({
                        "tool_calls": [{
                            "index": self.tool_call_index,
                            "id": tc.id,
                            "type": tc.type_,
                            "function": {
                                "name": tc.function.name,
                                "arguments": tc.function.arguments
                            }
                        }]
                    }),
                    None,
                );
                self.tool_call_index += 1;
                Some(chunk)
            }
            _ => None,
        }
    }

    /// Closing frames: the empty-delta finish chunk and the `[DONE]` marker.
    pub fn finish(&mut self) -> String {
        let reason = if self.has_tool_calls { "tool_calls" } else { "stop" };
        let mut out = self.delta_chunk(json!({}), Some(reason));
        out.push_str("data: [DONE]\n\n");
        out
    }

    /// In-band error frame; the stream ends after this.
    pub fn error_frame(message: &str) -> String {
        format!("data: {}\n\n", error_json(ErrorType::InternalError, message))
    }

    fn delta_chunk(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let mut choice = json!({
            "index": self.chunk_index,
            "delta": delta
        });
        if let Some(reason) = finish_reason {
            choice["finish_reason"] = json!(reason);
        }
        let chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [choice]
        });
        format!("data: {}\n\n", chunk)
    }
}

/// Non-streaming chat.completion response.
pub fn build_openai_response(
    id: &str,
    model: &str,
    content: &str,
    tool_calls: &[ToolCall],
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
) -> Value {
    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };

    let mut message = json!({
        "role": "assistant",
        "content": content
    });
    if !tool_calls.is_empty() {
        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": tc.type_,
                    "function": {
                        "name": tc.function.name,
                        "arguments": tc.function.arguments
                    }
                })
            })
            .collect();
        message["tool_calls"] = json!(calls);
    }

    json!({
        "id": id,
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": total_tokens
        }
    })
}

/// /v1/models response body.
pub fn build_models_response(model_ids: &[String]) -> Value {
    let now = chrono::Utc::now().timestamp();
    let data: Vec<Value> = model_ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": now,
                "owned_by": "kiro"
            })
        })
        .collect();
    json!({"object": "list", "data": data})
}
