#![allow(dead_code)]
// Shared utility functions: id generation, text extraction, schema sanitization.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Generate a unique tool call ID (OpenAI format): "call_" + 24 chars of a UUID.
pub fn generate_tool_call_id() -> String {
    format!("call_{}", &uuid::Uuid::new_v4().to_string()[..24])
}

/// Generate a unique tool use ID (Anthropic format): "toolu_" + 24 chars.
pub fn generate_tool_use_id() -> String {
    format!("toolu_{}", &uuid::Uuid::new_v4().to_string()[..24])
}

/// Generate a unique conversation ID (full UUID).
pub fn generate_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Machine fingerprint: SHA256("{hostname}-{username}-{os}"), first 8 bytes as hex.
/// Sent in the refresh User-Agent so the auth endpoint sees a stable client identity.
pub fn get_machine_fingerprint() -> String {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let data = format!("{}-{}-{}", hostname, username, std::env::consts::OS);
    let hash = Sha256::digest(data.as_bytes());
    hash[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Extract plain text from heterogeneous content.
///
/// - `null` → empty string
/// - string → itself
/// - array of blocks → concatenation of `text`-typed parts (others dropped)
/// - anything else → stringified form
pub fn extract_text_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut parts = Vec::new();
            for item in items {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        parts.push(text.to_string());
                    }
                }
            }
            parts.join("")
        }
        other => other.to_string(),
    }
}

/// Remove JSON Schema fields the Kiro API rejects.
///
/// Drops `additionalProperties` everywhere and `required` when its value is an
/// empty array. Recurses into `properties` entry-wise and into other nested
/// objects/arrays structurally. Non-object input passes through unchanged;
/// `null` becomes an empty object.
pub fn sanitize_json_schema(schema: &Value) -> Value {
    let obj = match schema {
        Value::Null => return Value::Object(Map::new()),
        Value::Object(o) => o,
        other => return other.clone(),
    };

    let mut result = Map::new();
    for (key, value) in obj {
        if key == "additionalProperties" {
            continue;
        }
        if key == "required" {
            if let Value::Array(arr) = value {
                if arr.is_empty() {
                    continue;
                }
            }
        }

        let sanitized = match value {
            Value::Object(props) if key == "properties" => {
                let mut out = Map::new();
                for (prop_key, prop_value) in props {
                    out.insert(prop_key.clone(), sanitize_json_schema(prop_value));
                }
                Value::Object(out)
            }
            Value::Object(_) => sanitize_json_schema(value),
            Value::Array(items) => {
                Value::Array(items.iter().map(sanitize_json_schema).collect())
            }
            other => other.clone(),
        };
        result.insert(key.clone(), sanitized);
    }

    Value::Object(result)
}
