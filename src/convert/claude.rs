// Anthropic messages wire types and conversion to the unified form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    ContentPart, ToolCall, UnifiedContent, UnifiedImage, UnifiedMessage, UnifiedTool,
    UnifiedToolResult,
};

/// Anthropic /v1/messages request. Unknown fields are ignored; the
/// sampling knobs are accepted for client compatibility but the upstream
/// does not consume them.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct ClaudeRequest {
    pub model: String,
    pub messages: Vec<ClaudeMessage>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub tools: Option<Vec<ClaudeTool>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

/// System prompt: a plain string or a list of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    String(String),
    Array(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl SystemPrompt {
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Array(blocks) => blocks
                .iter()
                .filter(|b| b.block_type == "text")
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    String(String),
    Array(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking")]
    Thinking { thinking: String },

    #[serde(rename = "image")]
    Image { source: ImageSource },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Convert an Anthropic request to unified messages + system prompt.
pub fn to_unified(request: &ClaudeRequest) -> (Vec<UnifiedMessage>, String) {
    let system_prompt = request
        .system
        .as_ref()
        .map(|s| s.to_text())
        .unwrap_or_default();

    let mut unified = Vec::new();
    for msg in &request.messages {
        let mut m = UnifiedMessage::new(&msg.role, UnifiedContent::empty());

        match &msg.content {
            MessageContent::String(s) => {
                m.content = UnifiedContent::Text(s.clone());
            }
            MessageContent::Array(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            parts.push(ContentPart::Text { text: text.clone() });
                        }
                        ContentBlock::Thinking { thinking } => {
                            // Prior-turn reasoning is not replayed upstream.
                            debug!("Dropping inbound thinking block ({} chars)", thinking.len());
                        }
                        ContentBlock::Image { source } => {
                            if source.source_type == "base64" {
                                parts.push(ContentPart::Image {
                                    media_type: source.media_type.clone(),
                                    data: source.data.clone(),
                                });
                                m.images.push(UnifiedImage {
                                    media_type: source.media_type.clone(),
                                    data: source.data.clone(),
                                });
                            }
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            parts.push(ContentPart::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                            });
                            m.tool_calls.push(ToolCall::new(
                                id.clone(),
                                name.clone(),
                                serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                            ));
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } => {
                            parts.push(ContentPart::ToolResult {
                                tool_use_id: tool_use_id.clone(),
                                content: content.clone(),
                            });
                            m.tool_results.push(UnifiedToolResult {
                                tool_use_id: tool_use_id.clone(),
                                content: content.clone(),
                            });
                        }
                        ContentBlock::Unknown => {}
                    }
                }
                m.content = UnifiedContent::Parts(parts);
            }
        }

        unified.push(m);
    }

    (unified, system_prompt)
}

/// Convert Anthropic tool definitions to unified tools.
pub fn tools_to_unified(tools: &[ClaudeTool]) -> Vec<UnifiedTool> {
    tools
        .iter()
        .map(|t| UnifiedTool {
            name: t.name.clone(),
            description: t.description.clone().unwrap_or_default(),
            input_schema: t.input_schema.clone().unwrap_or(Value::Null),
        })
        .collect()
}
