// OpenAI chat-completions wire types and conversion to the unified form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{
    parse_data_url, ContentPart, FunctionCall, ToolCall, UnifiedContent, UnifiedImage,
    UnifiedMessage, UnifiedTool, UnifiedToolResult,
};
use crate::utils::extract_text_content;

/// OpenAI chat-completions request. Unknown fields are ignored; the
/// sampling knobs are accepted for client compatibility but the upstream
/// does not consume them.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub n: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub function: OpenAiFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub type_: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Convert OpenAI messages to unified form. Returns the messages and the
/// extracted system prompt.
pub fn to_unified(messages: &[OpenAiMessage]) -> (Vec<UnifiedMessage>, String) {
    let mut unified: Vec<UnifiedMessage> = Vec::new();
    let mut system_prompt = String::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => {
                system_prompt = extract_text_content(&msg.content);
            }
            "user" => {
                let mut m = UnifiedMessage::new("user", content_to_unified(&msg.content));
                if let Some(ref id) = msg.tool_call_id {
                    m.tool_results.push(UnifiedToolResult {
                        tool_use_id: id.clone(),
                        content: msg.content.clone(),
                    });
                }
                m.images = extract_images(&msg.content);
                unified.push(m);
            }
            "assistant" => {
                let mut m = UnifiedMessage::new("assistant", content_to_unified(&msg.content));
                if let Some(ref calls) = msg.tool_calls {
                    for tc in calls {
                        m.tool_calls.push(ToolCall {
                            id: tc.id.clone(),
                            type_: tc.type_.clone(),
                            function: FunctionCall {
                                name: tc.function.name.clone(),
                                arguments: tc.function.arguments.clone(),
                            },
                        });
                    }
                }
                unified.push(m);
            }
            "tool" => {
                // Fold tool results into the preceding user message, creating
                // one when the history does not end with a user turn.
                let result = UnifiedToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone(),
                };
                match unified.last_mut() {
                    Some(last) if last.role == "user" => last.tool_results.push(result),
                    _ => {
                        let mut m = UnifiedMessage::new("user", UnifiedContent::empty());
                        m.tool_results.push(result);
                        unified.push(m);
                    }
                }
            }
            other => {
                warn!("Unknown role '{}', treating as user", other);
                unified.push(UnifiedMessage::new("user", content_to_unified(&msg.content)));
            }
        }
    }

    (unified, system_prompt)
}

/// Convert OpenAI tool definitions (type == "function") to unified tools.
pub fn tools_to_unified(tools: &[OpenAiTool]) -> Vec<UnifiedTool> {
    tools
        .iter()
        .filter(|t| t.type_ == "function")
        .map(|t| UnifiedTool {
            name: t.function.name.clone(),
            description: t.function.description.clone(),
            input_schema: t.function.parameters.clone(),
        })
        .collect()
}

fn content_to_unified(content: &Value) -> UnifiedContent {
    match content {
        Value::Null => UnifiedContent::empty(),
        Value::String(s) => UnifiedContent::Text(s.clone()),
        Value::Array(items) => {
            let mut parts = Vec::new();
            for item in items {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                            parts.push(ContentPart::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("image_url") => {
                        if let Some((media_type, data)) = image_url_part(item) {
                            parts.push(ContentPart::Image { media_type, data });
                        }
                    }
                    _ => {}
                }
            }
            UnifiedContent::Parts(parts)
        }
        other => UnifiedContent::Text(other.to_string()),
    }
}

/// Pull base64 images out of multipart OpenAI content.
fn extract_images(content: &Value) -> Vec<UnifiedImage> {
    let items = match content.as_array() {
        Some(items) => items,
        None => return Vec::new(),
    };

    let mut images = Vec::new();
    for item in items {
        if item.get("type").and_then(|t| t.as_str()) != Some("image_url") {
            continue;
        }
        if let Some((media_type, data)) = image_url_part(item) {
            images.push(UnifiedImage { media_type, data });
        }
    }
    images
}

fn image_url_part(item: &Value) -> Option<(String, String)> {
    let url = item.get("image_url")?.get("url")?.as_str()?;
    parse_data_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(role: &str, content: Value) -> OpenAiMessage {
        OpenAiMessage {
            role: role.to_string(),
            content,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn test_request_parses_and_ignores_unknown_fields() {
        let body = json!({
            "model": "claude-haiku-4-5",
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true,
            "temperature": 0.5,
            "max_tokens": 100,
            "some_future_field": {"nested": true}
        });
        let req: OpenAiRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.model, "claude-haiku-4-5");
        assert!(req.stream);
        assert_eq!(req.temperature, Some(0.5));
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_system_message_extracted() {
        let messages = vec![
            msg("system", json!("You are helpful.")),
            msg("user", json!("Hi")),
        ];
        let (unified, system) = to_unified(&messages);
        assert_eq!(system, "You are helpful.");
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].role, "user");
        assert_eq!(unified[0].content.extract_text(), "Hi");
    }

    #[test]
    fn test_assistant_tool_calls_converted() {
        let mut m = msg("assistant", Value::Null);
        m.tool_calls = Some(vec![OpenAiToolCall {
            id: "call_1".to_string(),
            type_: "function".to_string(),
            function: OpenAiFunction {
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Paris"}"#.to_string(),
            },
        }]);
        let (unified, _) = to_unified(&[m]);
        assert_eq!(unified[0].tool_calls.len(), 1);
        assert_eq!(unified[0].tool_calls[0].function.name, "get_weather");
    }

    #[test]
    fn test_tool_role_folds_into_previous_user() {
        let mut tool_msg = msg("tool", json!("result text"));
        tool_msg.tool_call_id = Some("call_1".to_string());
        let messages = vec![msg("user", json!("question")), tool_msg];
        let (unified, _) = to_unified(&messages);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].role, "user");
        assert_eq!(unified[0].tool_results.len(), 1);
        assert_eq!(unified[0].tool_results[0].tool_use_id, "call_1");
    }

    #[test]
    fn test_tool_role_creates_user_when_needed() {
        let mut tool_msg = msg("tool", json!("result"));
        tool_msg.tool_call_id = Some("call_9".to_string());
        let messages = vec![msg("assistant", json!("calling...")), tool_msg];
        let (unified, _) = to_unified(&messages);
        assert_eq!(unified.len(), 2);
        assert_eq!(unified[1].role, "user");
        assert_eq!(unified[1].tool_results.len(), 1);
        assert_eq!(unified[1].tool_results[0].tool_use_id, "call_9");
    }

    #[test]
    fn test_unknown_role_becomes_user() {
        let (unified, _) = to_unified(&[msg("function", json!("x"))]);
        assert_eq!(unified[0].role, "user");
    }

    #[test]
    fn test_multipart_content_with_image() {
        let content = json!([
            {"type": "text", "text": "describe this"},
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
        ]);
        let (unified, _) = to_unified(&[msg("user", content)]);
        assert_eq!(unified[0].content.extract_text(), "describe this");
        assert_eq!(unified[0].images.len(), 1);
        assert_eq!(unified[0].images[0].media_type, "image/png");
        assert_eq!(unified[0].images[0].data, "AAAA");
    }

    #[test]
    fn test_non_data_url_image_skipped() {
        let content = json!([
            {"type": "image_url", "image_url": {"url": "https://example.com/a.png"}}
        ]);
        let (unified, _) = to_unified(&[msg("user", content)]);
        assert!(unified[0].images.is_empty());
    }

    #[test]
    fn test_tools_to_unified_filters_non_function() {
        let tools: Vec<OpenAiTool> = serde_json::from_value(json!([
            {"type": "function", "function": {"name": "a", "description": "d", "parameters": {"type": "object"}}},
            {"type": "retrieval", "function": {"name": "b"}}
        ]))
        .unwrap();
        let unified = tools_to_unified(&tools);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].name, "a");
    }
}
