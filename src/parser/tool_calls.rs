// Bracket-format tool call parsing and tool call deduplication.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::convert::ToolCall;
use crate::utils::generate_tool_call_id;

/// Find the closing `}` for the `{` at `start`, handling strings and escapes.
/// Returns `None` if the object is incomplete.
pub fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if start >= bytes.len() || bytes[start] != b'{' {
        return None;
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, &ch) in bytes[start..].iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse `[Called func_name with args: {...}]` patterns out of model text.
/// Fallback path for providers that narrate tool calls instead of using the
/// structured events.
pub fn parse_bracket_tool_calls(text: &str) -> Vec<ToolCall> {
    if text.is_empty() || !text.contains("[Called") {
        return Vec::new();
    }

    let pattern = Regex::new(r"(?i)\[Called\s+(\w+)\s+with\s+args:\s*").unwrap();
    let mut results = Vec::new();

    for caps in pattern.captures_iter(text) {
        let func_name = caps.get(1).unwrap().as_str().to_string();
        let match_end = caps.get(0).unwrap().end();

        let json_start = match text[match_end..].find('{') {
            Some(offset) => match_end + offset,
            None => continue,
        };
        let json_end = match find_matching_brace(text, json_start) {
            Some(pos) => pos,
            None => continue,
        };

        let json_str = &text[json_start..=json_end];
        match serde_json::from_str::<Value>(json_str) {
            Ok(args) => {
                let arguments =
                    serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
                results.push(ToolCall::new(generate_tool_call_id(), func_name, arguments));
            }
            Err(_) => {
                warn!("Failed to parse bracket tool call arguments: {:.100}", json_str);
            }
        }
    }

    results
}

/// Deduplicate tool calls.
///
/// Calls with an id are grouped by id; within a group the entry with a
/// non-empty, longer arguments string wins. Id-less calls are then appended
/// and the whole list is deduplicated by (name, arguments).
pub fn deduplicate_tool_calls(tool_calls: Vec<ToolCall>) -> Vec<ToolCall> {
    if tool_calls.is_empty() {
        return tool_calls;
    }
    let original_len = tool_calls.len();

    let mut by_id: Vec<ToolCall> = Vec::new();
    let mut id_index: HashMap<String, usize> = HashMap::new();

    for tc in &tool_calls {
        if tc.id.is_empty() {
            continue;
        }
        match id_index.get(&tc.id) {
            None => {
                id_index.insert(tc.id.clone(), by_id.len());
                by_id.push(tc.clone());
            }
            Some(&idx) => {
                let existing = &by_id[idx];
                if tc.function.arguments != "{}"
                    && (existing.function.arguments == "{}"
                        || tc.function.arguments.len() > existing.function.arguments.len())
                {
                    by_id[idx] = tc.clone();
                }
            }
        }
    }

    let mut result = by_id;
    for tc in &tool_calls {
        if tc.id.is_empty() {
            result.push(tc.clone());
        }
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::with_capacity(result.len());
    for tc in result {
        let key = (tc.function.name.clone(), tc.function.arguments.clone());
        if seen.insert(key) {
            unique.push(tc);
        }
    }

    if unique.len() != original_len {
        debug!("Deduplicated tool calls: {} -> {}", original_len, unique.len());
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall::new(id.to_string(), name.to_string(), args.to_string())
    }

    // ── find_matching_brace ─────────────────────────────────────────

    #[test]
    fn test_find_matching_brace_simple() {
        assert_eq!(find_matching_brace(r#"{"a": 1}"#, 0), Some(7));
    }

    #[test]
    fn test_find_matching_brace_nested() {
        assert_eq!(find_matching_brace(r#"{"a": {"b": 1}}"#, 0), Some(14));
    }

    #[test]
    fn test_find_matching_brace_braces_in_string() {
        assert_eq!(find_matching_brace(r#"{"a": "{}"}"#, 0), Some(10));
    }

    #[test]
    fn test_find_matching_brace_escaped_quote() {
        assert_eq!(find_matching_brace(r#"{"a": "\"}"}"#, 0), Some(11));
    }

    #[test]
    fn test_find_matching_brace_incomplete() {
        assert_eq!(find_matching_brace(r#"{"a": 1"#, 0), None);
    }

    #[test]
    fn test_find_matching_brace_not_a_brace() {
        assert_eq!(find_matching_brace("hello", 0), None);
    }

    // ── parse_bracket_tool_calls ────────────────────────────────────

    #[test]
    fn test_bracket_single_call() {
        let text = r#"[Called get_weather with args: {"city": "London"}]"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_weather");
        assert!(calls[0].id.starts_with("call_"));
        let args: Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "London");
    }

    #[test]
    fn test_bracket_multiple_calls() {
        let text = r#"x [Called foo with args: {"a": 1}] y [Called bar with args: {"b": 2}] z"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "foo");
        assert_eq!(calls[1].function.name, "bar");
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_bracket_no_calls() {
        assert!(parse_bracket_tool_calls("").is_empty());
        assert!(parse_bracket_tool_calls("plain text").is_empty());
    }

    #[test]
    fn test_bracket_invalid_json_skipped() {
        let text = r#"[Called bad with args: {not json}] [Called good with args: {"ok": true}]"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "good");
    }

    // ── deduplicate_tool_calls ──────────────────────────────────────

    #[test]
    fn test_dedup_by_id_keeps_longer_args() {
        let calls = vec![
            call("t1", "lookup", "{}"),
            call("t1", "lookup", r#"{"q":"rust"}"#),
        ];
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].function.arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn test_dedup_by_name_and_args_for_idless() {
        let calls = vec![
            call("", "foo", r#"{"a":1}"#),
            call("", "foo", r#"{"a":1}"#),
            call("", "foo", r#"{"a":2}"#),
        ];
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_dedup_merges_structured_and_bracket() {
        // Same call surfaced twice: once structured (with id), once via the
        // bracket fallback (fresh id, same name+args). Name+args dedup keeps one.
        let calls = vec![
            call("t1", "get_weather", r#"{"city":"Paris"}"#),
            call("call_fresh000000000000000000", "get_weather", r#"{"city":"Paris"}"#),
        ];
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, "t1");
    }

    #[test]
    fn test_dedup_preserves_order() {
        let calls = vec![
            call("c", "c_tool", "{}"),
            call("a", "a_tool", "{}"),
            call("b", "b_tool", "{}"),
            call("a", "a_tool", "{}"),
        ];
        let deduped = deduplicate_tool_calls(calls);
        let names: Vec<&str> = deduped.iter().map(|c| c.function.name.as_str()).collect();
        assert_eq!(names, vec!["c_tool", "a_tool", "b_tool"]);
    }

    #[test]
    fn test_dedup_empty() {
        assert!(deduplicate_tool_calls(vec![]).is_empty());
    }

    // ── properties ──────────────────────────────────────────────────

    use proptest::prelude::*;

    proptest! {
        /// Bracket parsing recovers name and arguments for well-formed input.
        #[test]
        fn prop_bracket_parsing(
            name in "[a-zA-Z][a-zA-Z0-9_]{0,20}",
            key in "[a-zA-Z]{1,10}",
            val in "[a-zA-Z0-9 ]{0,30}",
        ) {
            let input = format!(r#"[Called {} with args: {{"{}": "{}"}}]"#, name, key, val);
            let calls = parse_bracket_tool_calls(&input);
            prop_assert_eq!(calls.len(), 1);
            prop_assert_eq!(&calls[0].function.name, &name);
            let args: Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
            prop_assert_eq!(args[&key].as_str().unwrap(), val.as_str());
        }

        /// Dedup is idempotent: f(f(x)) == f(x).
        #[test]
        fn prop_dedup_idempotent(
            n in 1..10usize,
            name in "[a-zA-Z]{1,8}",
        ) {
            let calls: Vec<ToolCall> = (0..n)
                .map(|i| call(&format!("t{}", i % 3), &name, &format!(r#"{{"i":{}}}"#, i % 2)))
                .collect();
            let once = deduplicate_tool_calls(calls);
            let twice = deduplicate_tool_calls(once.clone());
            prop_assert_eq!(once, twice);
        }

        /// Every finalized bracket tool call has arguments that parse as JSON.
        #[test]
        fn prop_bracket_args_always_json(
            name in "[a-zA-Z]{1,10}",
            garbage in "[^{}\\[\\]]{0,40}",
        ) {
            let input = format!("[Called {} with args: {{}}] {}", name, garbage);
            for tc in parse_bracket_tool_calls(&input) {
                prop_assert!(serde_json::from_str::<Value>(&tc.function.arguments).is_ok());
            }
        }
    }

    #[test]
    fn test_bracket_then_dedup_roundtrip() {
        let text = r#"[Called f with args: {"x": 1}] and again [Called f with args: {"x": 1}]"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 2);
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped.len(), 1);
        let args: Value = serde_json::from_str(&deduped[0].function.arguments).unwrap();
        assert_eq!(args, json!({"x": 1}));
    }
}
