// Anthropic SSE framer: normalized events → message_* / content_block_*
// event frames.

use serde_json::{json, Value};

use super::{estimate_tokens, KiroEvent};
use crate::convert::ToolCall;

/// State machine producing the Anthropic event sequence. At most one text
/// block and one thinking block are alive at a time; tool_use events close
/// whatever is open and emit a self-contained block.
pub struct AnthropicSseFramer {
    message_id: String,
    model: String,
    content_index: usize,
    text_block_index: Option<usize>,
    thinking_block_index: Option<usize>,
    output_tokens: u32,
}

impl AnthropicSseFramer {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!(
                "msg_{}",
                &uuid::Uuid::new_v4().to_string().replace('-', "")[..24]
            ),
            model: model.to_string(),
            content_index: 0,
            text_block_index: None,
            thinking_block_index: None,
            output_tokens: 0,
        }
    }

    fn format_sse(event: &str, data: &Value) -> String {
        format!(
            "event: {}\ndata: {}\n\n",
            event,
            serde_json::to_string(data).unwrap_or_default()
        )
    }

    /// Opening frame: empty assistant message with zeroed usage.
    pub fn message_start(&self) -> String {
        Self::format_sse(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": 0,
                        "output_tokens": 0
                    }
                }
            }),
        )
    }

    pub fn process_event(&mut self, event: &KiroEvent) -> String {
        match event {
            KiroEvent::Content(text) if !text.is_empty() => {
                let mut out = String::new();
                let index = match self.text_block_index {
                    Some(index) => index,
                    None => {
                        let index = self.content_index;
                        self.content_index += 1;
                        self.text_block_index = Some(index);
                        out.push_str(&Self::format_sse(
                            "content_block_start",
                            &json!({
                                "type": "content_block_start",
                                "index": index,
                                "content_block": {"type": "text", "text": ""}
                            }),
                        ));
                        index
                    }
                };
                self.output_tokens += estimate_tokens(text);
                out.push_str(&Self::format_sse(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "text_delta", "text": text}
                    }),
                ));
                out
            }

            KiroEvent::Thinking { text, .. } if !text.is_empty() => {
                let mut out = String::new();
                let index = match self.thinking_block_index {
                    Some(index) => index,
                    None => {
                        let index = self.content_index;
                        self.content_index += 1;
                        self.thinking_block_index = Some(index);
                        out.push_str(&Self::format_sse(
                            "content_block_start",
                            &json!({
                                "type": "content_block_start",
                                "index": index,
                                "content_block": {"type": "thinking", "thinking": ""}
                            }),
                        ));
                        index
                    }
                };
                self.output_tokens += estimate_tokens(text);
                out.push_str(&Self::format_sse(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "thinking_delta", "thinking": text}
                    }),
                ));
                out
            }

            KiroEvent::ToolUse(tc) => {
                let mut out = self.close_open_blocks();
                out.push_str(&self.tool_use_block(tc));
                out
            }

            // Usage metadata shapes the closing frames only.
            _ => String::new(),
        }
    }

    fn close_open_blocks(&mut self) -> String {
        let mut out = String::new();
        if let Some(index) = self.thinking_block_index.take() {
            out.push_str(&Self::format_sse(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": index}),
            ));
        }
        if let Some(index) = self.text_block_index.take() {
            out.push_str(&Self::format_sse(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": index}),
            ));
        }
        out
    }

    /// Emit a complete tool_use block: start, one input_json_delta carrying
    /// the full serialized arguments, stop.
    fn tool_use_block(&mut self, tc: &ToolCall) -> String {
        let index = self.content_index;
        self.content_index += 1;

        let mut out = Self::format_sse(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.function.name,
                    "input": {}
                }
            }),
        );
        out.push_str(&Self::format_sse(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {
                    "type": "input_json_delta",
                    "partial_json": tc.function.arguments
                }
            }),
        ));
        out.push_str(&Self::format_sse(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": index}),
        ));
        self.output_tokens += estimate_tokens(&tc.function.name);
        out
    }

    /// Closing frames: stop any open block, message_delta with the
    /// cumulative output estimate, message_stop. The upstream provides no
    /// stop reason, so the close is always end_turn.
    pub fn finish(&mut self) -> String {
        let mut out = self.close_open_blocks();

        out.push_str(&Self::format_sse(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": "end_turn",
                    "stop_sequence": null
                },
                "usage": {
                    "output_tokens": self.output_tokens
                }
            }),
        ));
        out.push_str(&Self::format_sse(
            "message_stop",
            &json!({"type": "message_stop"}),
        ));
        out
    }

    /// In-band error frame; the stream ends after this.
    pub fn error_frame(message: &str) -> String {
        Self::format_sse(
            "error",
            &json!({
                "type": "error",
                "error": {"type": "api_error", "message": message}
            }),
        )
    }

    pub fn output_tokens(&self) -> u32 {
        self.output_tokens
    }
}

/// Non-streaming Anthropic message response.
pub fn build_anthropic_response(
    message_id: &str,
    model: &str,
    content: &str,
    thinking: &str,
    tool_calls: &[ToolCall],
    input_tokens: u32,
    output_tokens: u32,
) -> Value {
    let mut blocks: Vec<Value> = Vec::new();
    if !thinking.is_empty() {
        blocks.push(json!({"type": "thinking", "thinking": thinking}));
    }
    if !content.is_empty() {
        blocks.push(json!({"type": "text", "text": content}));
    }
    for tc in tool_calls {
        let input: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
        blocks.push(json!({
            "type": "tool_use",
            "id": tc.id,
            "name": tc.function.name,
            "input": input
        }));
    }

    json!({
        "id": message_id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": blocks,
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens
        }
    })
}
