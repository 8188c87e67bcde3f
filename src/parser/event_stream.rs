// Incremental parser for the upstream's event stream: concatenated JSON
// objects embedded in binary framing, with chunk boundaries falling anywhere.

use serde_json::Value;
use tracing::{debug, warn};

use super::tool_calls::deduplicate_tool_calls;
use crate::convert::{FunctionCall, ToolCall};
use crate::utils::generate_tool_call_id;

/// Known JSON object prefixes in the upstream stream, scanned in the raw
/// byte buffer. Binary frame bytes between objects are ignored.
const PATTERNS: &[(&[u8], EventKind)] = &[
    (b"{\"content\":", EventKind::Content),
    (b"{\"name\":", EventKind::ToolStart),
    (b"{\"input\":", EventKind::ToolInput),
    (b"{\"stop\":", EventKind::ToolStop),
    (b"{\"usage\":", EventKind::Usage),
    (b"{\"contextUsagePercentage\":", EventKind::ContextUsage),
];

/// Longest pattern length; a tail shorter than this may still grow into a
/// pattern, so it is never discarded.
const MAX_PATTERN_LEN: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Content,
    ToolStart,
    ToolInput,
    ToolStop,
    Usage,
    ContextUsage,
}

/// Event emitted by the parser. Tool calls are accumulated internally and
/// surfaced through `take_tool_calls` once their stop sentinel (or a
/// successor's start) arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    Content(String),
    Usage { credits: i64 },
    ContextUsage(f64),
}

/// Single-owner incremental parser; one instance per upstream response.
pub struct AwsEventStreamParser {
    buffer: Vec<u8>,
    last_content: Option<String>,
    current_tool_call: Option<ToolCall>,
    tool_calls: Vec<ToolCall>,
}

impl Default for AwsEventStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsEventStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            last_content: None,
            current_tool_call: None,
            tool_calls: Vec::new(),
        }
    }

    /// Append a chunk and drain every complete JSON object from the buffer.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParserEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            // Earliest occurrence of any known pattern.
            let mut earliest: Option<(usize, EventKind)> = None;
            for (pattern, kind) in PATTERNS {
                if let Some(pos) = find_subslice(&self.buffer, pattern) {
                    match earliest {
                        None => earliest = Some((pos, *kind)),
                        Some((best, _)) if pos < best => earliest = Some((pos, *kind)),
                        _ => {}
                    }
                }
            }

            let (start, kind) = match earliest {
                Some(found) => found,
                None => {
                    // No pattern anywhere: everything but a possible pattern
                    // prefix at the tail is framing garbage.
                    if self.buffer.len() > MAX_PATTERN_LEN {
                        let keep_from = self.buffer.len() - MAX_PATTERN_LEN;
                        self.buffer.drain(..keep_from);
                    }
                    break;
                }
            };

            let end = match find_matching_brace_bytes(&self.buffer, start) {
                Some(end) => end,
                None => {
                    // Object spans past the buffer end; drop the garbage
                    // before it and wait for more bytes.
                    self.buffer.drain(..start);
                    break;
                }
            };

            let json_bytes: Vec<u8> = self.buffer[start..=end].to_vec();
            self.buffer.drain(..=end);

            match serde_json::from_slice::<Value>(&json_bytes) {
                Ok(value) => {
                    if let Some(event) = self.dispatch(kind, &value) {
                        events.push(event);
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to parse stream object: {} (data: {:.100})",
                        e,
                        String::from_utf8_lossy(&json_bytes)
                    );
                }
            }
        }

        events
    }

    fn dispatch(&mut self, kind: EventKind, value: &Value) -> Option<ParserEvent> {
        match kind {
            EventKind::Content => {
                // followupPrompt objects share the content prefix; drop them.
                if value
                    .get("followupPrompt")
                    .and_then(|v| v.as_str())
                    .map(|s| !s.is_empty())
                    .unwrap_or(false)
                {
                    return None;
                }
                let content = value.get("content").and_then(|v| v.as_str())?.to_string();
                if self.last_content.as_deref() == Some(content.as_str()) {
                    return None;
                }
                self.last_content = Some(content.clone());
                Some(ParserEvent::Content(content))
            }

            EventKind::ToolStart => {
                self.finalize_tool_call();

                let name = value
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let id = value
                    .get("toolUseId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let arguments = input_as_string(value.get("input"));

                self.current_tool_call = Some(ToolCall {
                    id,
                    type_: "function".to_string(),
                    function: FunctionCall { name, arguments },
                });

                if value.get("stop").and_then(|v| v.as_bool()).unwrap_or(false) {
                    self.finalize_tool_call();
                }
                None
            }

            EventKind::ToolInput => {
                if let Some(ref mut tc) = self.current_tool_call {
                    tc.function
                        .arguments
                        .push_str(&input_as_string(value.get("input")));
                }
                None
            }

            EventKind::ToolStop => {
                if value.get("stop").and_then(|v| v.as_bool()).unwrap_or(false) {
                    self.finalize_tool_call();
                }
                None
            }

            EventKind::Usage => {
                let credits = value.get("usage").and_then(|v| v.as_i64()).unwrap_or(0);
                Some(ParserEvent::Usage { credits })
            }

            EventKind::ContextUsage => {
                let pct = value
                    .get("contextUsagePercentage")
                    .and_then(|v| v.as_f64())?;
                Some(ParserEvent::ContextUsage(pct))
            }
        }
    }

    /// Finalize the in-progress tool call: arguments must parse as JSON
    /// (re-serialized to canonical form) or they become `{}`.
    fn finalize_tool_call(&mut self) {
        let mut tc = match self.current_tool_call.take() {
            Some(tc) => tc,
            None => return,
        };

        debug!(
            "Finalizing tool call '{}' with raw arguments: {:.200}",
            tc.function.name, tc.function.arguments
        );

        if tc.function.arguments.is_empty() {
            tc.function.arguments = "{}".to_string();
        } else {
            match serde_json::from_str::<Value>(&tc.function.arguments) {
                Ok(parsed) => {
                    tc.function.arguments =
                        serde_json::to_string(&parsed).unwrap_or_else(|_| "{}".to_string());
                }
                Err(e) => {
                    warn!("Failed to parse tool '{}' arguments: {}", tc.function.name, e);
                    tc.function.arguments = "{}".to_string();
                }
            }
        }

        if tc.id.is_empty() {
            tc.id = generate_tool_call_id();
        }

        self.tool_calls.push(tc);
    }

    /// Finalize any in-progress call and return the deduplicated tool calls.
    pub fn take_tool_calls(&mut self) -> Vec<ToolCall> {
        self.finalize_tool_call();
        deduplicate_tool_calls(std::mem::take(&mut self.tool_calls))
    }
}

/// Input fields arrive either as a JSON-fragment string or as an object.
fn input_as_string(input: Option<&Value>) -> String {
    match input {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(_)) => serde_json::to_string(input.unwrap()).unwrap_or_default(),
        _ => String::new(),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Byte-level balanced-brace walk; quotes and escapes are respected.
fn find_matching_brace_bytes(buffer: &[u8], start: usize) -> Option<usize> {
    if start >= buffer.len() || buffer[start] != b'{' {
        return None;
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, &ch) in buffer[start..].iter().enumerate() {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut AwsEventStreamParser, input: &str) -> Vec<ParserEvent> {
        parser.feed(input.as_bytes())
    }

    fn contents(events: &[ParserEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Content(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_concatenated_content() {
        let mut p = AwsEventStreamParser::new();
        let events = feed_all(&mut p, r#"{"content":"Hel"}{"content":"lo"}"#);
        assert_eq!(contents(&events), vec!["Hel", "lo"]);
    }

    #[test]
    fn test_content_dedup() {
        let mut p = AwsEventStreamParser::new();
        let events = feed_all(
            &mut p,
            r#"{"content":"same"}{"content":"same"}{"content":"diff"}"#,
        );
        assert_eq!(contents(&events), vec!["same", "diff"]);
    }

    #[test]
    fn test_followup_prompt_dropped() {
        let mut p = AwsEventStreamParser::new();
        let events = feed_all(
            &mut p,
            r#"{"content":"real","followupPrompt":""}{"content":"x","followupPrompt":"Want more?"}"#,
        );
        assert_eq!(contents(&events), vec!["real"]);
    }

    #[test]
    fn test_chunk_split_mid_object() {
        let mut p = AwsEventStreamParser::new();
        let e1 = p.feed(br#"{"content":"Hel"#);
        assert!(e1.is_empty());
        let e2 = p.feed(br#"lo"}"#);
        assert_eq!(contents(&e2), vec!["Hello"]);
    }

    #[test]
    fn test_chunk_split_mid_multibyte_char() {
        let mut p = AwsEventStreamParser::new();
        let full = r#"{"content":"héllo"}"#.as_bytes();
        // Split inside the two-byte é sequence.
        let split = full.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let e1 = p.feed(&full[..split]);
        assert!(e1.is_empty());
        let e2 = p.feed(&full[split..]);
        assert_eq!(contents(&e2), vec!["héllo"]);
    }

    #[test]
    fn test_binary_garbage_between_objects() {
        let mut p = AwsEventStreamParser::new();
        let mut input: Vec<u8> = Vec::new();
        input.extend_from_slice(&[0x00, 0x01, 0xff, 0xfe, b'{', 0x02]);
        input.extend_from_slice(br#"{"content":"a"}"#);
        input.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        input.extend_from_slice(br#"{"content":"b"}"#);
        let events = p.feed(&input);
        assert_eq!(contents(&events), vec!["a", "b"]);
    }

    #[test]
    fn test_tool_call_accumulation() {
        let mut p = AwsEventStreamParser::new();
        feed_all(
            &mut p,
            r#"{"name":"get_weather","toolUseId":"t1"}{"input":"{\"city\":"}{"input":"\"Paris\"}"}{"stop":true}"#,
        );
        let calls = p.take_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].function.name, "get_weather");
        let args: Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "Paris");
    }

    #[test]
    fn test_tool_start_with_object_input_and_inline_stop() {
        let mut p = AwsEventStreamParser::new();
        feed_all(
            &mut p,
            r#"{"name":"lookup","toolUseId":"t2","input":{"q":"rust"},"stop":true}"#,
        );
        let calls = p.take_tool_calls();
        assert_eq!(calls.len(), 1);
        let args: Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["q"], "rust");
    }

    #[test]
    fn test_successor_name_finalizes_previous() {
        let mut p = AwsEventStreamParser::new();
        feed_all(
            &mut p,
            r#"{"name":"first","toolUseId":"t1"}{"input":"{}"}{"name":"second","toolUseId":"t2"}{"stop":true}"#,
        );
        let calls = p.take_tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn test_invalid_tool_args_become_empty_object() {
        let mut p = AwsEventStreamParser::new();
        feed_all(
            &mut p,
            r#"{"name":"broken","toolUseId":"t1"}{"input":"not json at all"}{"stop":true}"#,
        );
        let calls = p.take_tool_calls();
        assert_eq!(calls[0].function.arguments, "{}");
    }

    #[test]
    fn test_missing_tool_id_generated() {
        let mut p = AwsEventStreamParser::new();
        feed_all(&mut p, r#"{"name":"anon"}{"stop":true}"#);
        let calls = p.take_tool_calls();
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_end_of_stream_finalizes_open_call() {
        let mut p = AwsEventStreamParser::new();
        feed_all(&mut p, r#"{"name":"unfinished","toolUseId":"t9"}{"input":"{\"a\":1}"}"#);
        // No stop sentinel; take_tool_calls finalizes.
        let calls = p.take_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, r#"{"a":1}"#);
    }

    #[test]
    fn test_usage_and_context_usage_events() {
        let mut p = AwsEventStreamParser::new();
        let events = feed_all(&mut p, r#"{"usage":7}{"contextUsagePercentage":12.5}"#);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ParserEvent::Usage { credits: 7 });
        assert_eq!(events[1], ParserEvent::ContextUsage(12.5));
    }

    #[test]
    fn test_unparseable_slice_skipped() {
        // A pattern match whose brace-balanced slice still fails JSON parsing
        // is logged and skipped; the stream continues.
        let mut p = AwsEventStreamParser::new();
        let events = feed_all(&mut p, "{\"content\":bad}{\"content\":\"ok\"}");
        assert_eq!(contents(&events), vec!["ok"]);
    }

    #[test]
    fn test_nested_braces_in_content() {
        let mut p = AwsEventStreamParser::new();
        let events = feed_all(&mut p, r#"{"content":"code: {\"x\": {\"y\": 1}}"}"#);
        assert_eq!(contents(&events), vec![r#"code: {"x": {"y": 1}}"#]);
    }

    use proptest::prelude::*;

    proptest! {
        /// Chunking invariance: any split of the byte stream yields the same
        /// events as a single feed.
        #[test]
        fn prop_chunking_invariance(
            texts in prop::collection::vec("[a-zA-Z0-9 ]{1,20}", 1..5),
            split_pct in 0..100usize,
        ) {
            let mut stream = String::new();
            for t in &texts {
                stream.push_str(&format!(r#"{{"content":"{}"}}"#, t));
            }
            let bytes = stream.as_bytes();

            let mut reference = AwsEventStreamParser::new();
            let ref_events = reference.feed(bytes);

            let split = bytes.len() * split_pct / 100;
            let mut chunked = AwsEventStreamParser::new();
            let mut events = chunked.feed(&bytes[..split]);
            events.extend(chunked.feed(&bytes[split..]));

            prop_assert_eq!(contents(&ref_events), contents(&events));
        }

        /// Every finalized tool call's arguments parse as JSON.
        #[test]
        fn prop_finalized_args_parse(
            name in "[a-z]{1,10}",
            fragment in "[a-z{}\" :,0-9]{0,30}",
        ) {
            let input = format!(
                r#"{{"name":"{}","toolUseId":"t1"}}{{"input":{}}}{{"stop":true}}"#,
                name,
                serde_json::to_string(&fragment).unwrap(),
            );
            let mut p = AwsEventStreamParser::new();
            p.feed(input.as_bytes());
            for tc in p.take_tool_calls() {
                prop_assert!(serde_json::from_str::<Value>(&tc.function.arguments).is_ok());
            }
        }

        /// Two consecutive content events never carry equal text.
        #[test]
        fn prop_no_consecutive_duplicate_content(
            texts in prop::collection::vec("[a-c]{1,2}", 1..10),
        ) {
            let mut stream = String::new();
            for t in &texts {
                stream.push_str(&format!(r#"{{"content":"{}"}}"#, t));
            }
            let mut p = AwsEventStreamParser::new();
            let events = p.feed(stream.as_bytes());
            let out = contents(&events);
            for pair in out.windows(2) {
                prop_assert_ne!(&pair[0], &pair[1]);
            }
        }
    }
}
