#![allow(dead_code)]
// Conversion between client dialects (OpenAI, Anthropic) and the Kiro
// upstream format, via a unified internal message representation.

pub mod claude;
pub mod kiro;
pub mod openai;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call in unified (OpenAI-shaped) form. Arguments are kept as a
/// JSON-serialized string until finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: String, name: String, arguments: String) -> Self {
        Self {
            id,
            type_: "function".to_string(),
            function: FunctionCall { name, arguments },
        }
    }
}

/// A tool result paired with a prior tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedToolResult {
    pub tool_use_id: String,
    pub content: Value,
}

/// An image attachment: media type + raw base64 payload (no data: prefix).
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedImage {
    pub media_type: String,
    pub data: String,
}

/// One typed part of multipart message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text { text: String },
    Image { media_type: String, data: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Value },
}

/// Message content: plain text or an ordered sequence of typed parts.
#[derive(Debug, Clone, PartialEq)]
pub enum UnifiedContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UnifiedContent {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    /// Concatenated text of the content; non-text parts are dropped.
    pub fn extract_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Canonical internal message form, independent of the inbound dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedMessage {
    pub role: String,
    pub content: UnifiedContent,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<UnifiedToolResult>,
    pub images: Vec<UnifiedImage>,
}

impl UnifiedMessage {
    pub fn new(role: &str, content: UnifiedContent) -> Self {
        Self {
            role: role.to_string(),
            content,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn text(role: &str, text: &str) -> Self {
        Self::new(role, UnifiedContent::Text(text.to_string()))
    }
}

/// A tool definition in unified form.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Split a `data:<media-type>;base64,<payload>` URL into media type and
/// raw base64 payload. Returns `None` when the URL is not a data URL.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let comma = rest.find(',')?;
    let header = &rest[..comma];
    let payload = &rest[comma + 1..];
    let media_type = header.split(';').next().unwrap_or("").to_string();
    let media_type = if media_type.is_empty() {
        "image/jpeg".to_string()
    } else {
        media_type
    };
    Some((media_type, payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_text_plain() {
        let content = UnifiedContent::Text("hello".to_string());
        assert_eq!(content.extract_text(), "hello");
    }

    #[test]
    fn test_extract_text_parts_drops_non_text() {
        let content = UnifiedContent::Parts(vec![
            ContentPart::Text {
                text: "a".to_string(),
            },
            ContentPart::Image {
                media_type: "image/png".to_string(),
                data: "b64".to_string(),
            },
            ContentPart::ToolUse {
                id: "t1".to_string(),
                name: "lookup".to_string(),
                input: json!({}),
            },
            ContentPart::Text {
                text: "b".to_string(),
            },
        ]);
        assert_eq!(content.extract_text(), "ab");
    }

    #[test]
    fn test_tool_call_serializes_openai_shape() {
        let tc = ToolCall::new("call_abc".into(), "get_weather".into(), r#"{"city":"Paris"}"#.into());
        let json = serde_json::to_value(&tc).unwrap();
        assert_eq!(json["id"], "call_abc");
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_weather");
        assert_eq!(json["function"]["arguments"], r#"{"city":"Paris"}"#);
    }

    #[test]
    fn test_parse_data_url() {
        let (media, data) = parse_data_url("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(media, "image/png");
        assert_eq!(data, "iVBORw0KGgo=");

        // No media type defaults to jpeg.
        let (media, data) = parse_data_url("data:;base64,abcd").unwrap();
        assert_eq!(media, "image/jpeg");
        assert_eq!(data, "abcd");

        assert!(parse_data_url("https://example.com/x.png").is_none());
        assert!(parse_data_url("data:image/png;base64").is_none());
    }
}
