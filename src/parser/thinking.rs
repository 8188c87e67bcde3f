#![allow(dead_code)]
// Buffered state machine that extracts a tag-delimited reasoning prefix
// from streaming model output and routes it onto a separate channel.

use tracing::debug;

use crate::config::ReasoningHandling;

/// Default open tags when configuration provides none.
pub const DEFAULT_OPEN_TAGS: [&str; 4] = ["<thinking>", "alettek", "<reasoning>", "<thought>"];

/// Result of feeding one content chunk through the parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThinkingParseResult {
    pub thinking_content: String,
    pub regular_content: String,
    pub is_first_thinking_chunk: bool,
    pub is_last_thinking_chunk: bool,
}

impl ThinkingParseResult {
    pub fn is_empty(&self) -> bool {
        self.thinking_content.is_empty() && self.regular_content.is_empty()
    }
}

/// States: PRE (buffering, no tag decision yet), IN (inside a reasoning
/// block), DONE (reasoning finished or never found; pass-through).
pub struct ThinkingParser {
    handling_mode: ReasoningHandling,
    open_tags: Vec<String>,
    initial_buffer_size: usize,

    buffer: String,
    found_thinking: bool,
    in_thinking: bool,
    thinking_ended: bool,
    thinking_content: String,
    tag_open: String,
    tag_close: String,
    first_thinking_sent: bool,
}

impl ThinkingParser {
    pub fn new(
        handling_mode: ReasoningHandling,
        open_tags: &[String],
        initial_buffer_size: usize,
    ) -> Self {
        let open_tags = if open_tags.is_empty() {
            DEFAULT_OPEN_TAGS.iter().map(|s| s.to_string()).collect()
        } else {
            open_tags.to_vec()
        };
        Self {
            handling_mode,
            open_tags,
            initial_buffer_size,
            buffer: String::new(),
            found_thinking: false,
            in_thinking: false,
            thinking_ended: false,
            thinking_content: String::new(),
            tag_open: String::new(),
            tag_close: String::new(),
            first_thinking_sent: false,
        }
    }

    /// Process a content chunk.
    pub fn feed(&mut self, content: &str) -> ThinkingParseResult {
        let mut result = ThinkingParseResult::default();

        // DONE: pass through; later tags are ordinary text.
        if self.thinking_ended {
            result.regular_content = content.to_string();
            return result;
        }

        if self.in_thinking {
            self.process_thinking_content(content, &mut result);
            return result;
        }

        // PRE: accumulate until the detection window fills.
        self.buffer.push_str(content);
        if self.buffer.len() >= self.initial_buffer_size {
            self.check_for_thinking_tag(&mut result);
        }
        result
    }

    fn check_for_thinking_tag(&mut self, result: &mut ThinkingParseResult) {
        for tag in self.open_tags.clone() {
            if let Some(idx) = self.buffer.find(&tag) {
                self.found_thinking = true;
                self.in_thinking = true;
                self.tag_open = tag.clone();
                self.tag_close = close_tag_for(&tag);
                debug!("Found thinking tag: {}", tag);

                let before = self.buffer[..idx].to_string();
                let after = self.buffer[idx + tag.len()..].to_string();
                self.buffer.clear();

                if !before.is_empty() {
                    result.regular_content = before;
                }
                if !after.is_empty() {
                    self.process_thinking_content(&after, result);
                }

                result.is_first_thinking_chunk = true;
                return;
            }
        }

        // No tag in the detection window: degrade to pass-through.
        self.thinking_ended = true;
        result.regular_content = std::mem::take(&mut self.buffer);
    }

    fn process_thinking_content(&mut self, content: &str, result: &mut ThinkingParseResult) {
        if self.tag_close.is_empty() {
            return;
        }

        if let Some(idx) = content.find(&self.tag_close) {
            let thinking_part = &content[..idx];
            let regular_part = &content[idx + self.tag_close.len()..];

            self.thinking_content.push_str(thinking_part);
            self.in_thinking = false;
            self.thinking_ended = true;

            result.thinking_content =
                self.process_for_output(thinking_part, !self.first_thinking_sent, true);
            result.is_last_thinking_chunk = true;

            if !regular_part.is_empty() {
                result.regular_content.push_str(regular_part);
            }
            debug!("Thinking block processing completed");
        } else {
            self.thinking_content.push_str(content);
            result.thinking_content =
                self.process_for_output(content, !self.first_thinking_sent, false);
            if !self.first_thinking_sent {
                result.is_first_thinking_chunk = true;
                self.first_thinking_sent = true;
            }
        }
    }

    /// Shape thinking output according to the handling mode.
    fn process_for_output(&self, content: &str, is_first: bool, is_last: bool) -> String {
        match self.handling_mode {
            ReasoningHandling::Remove => String::new(),
            ReasoningHandling::Pass => {
                let mut out = String::new();
                if is_first {
                    out.push_str(&self.tag_open);
                }
                out.push_str(content);
                if is_last {
                    out.push_str(&self.tag_close);
                }
                out
            }
            ReasoningHandling::StripTags | ReasoningHandling::AsReasoningContent => {
                content.to_string()
            }
        }
    }

    /// Flush state at stream end: buffered PRE content becomes regular,
    /// un-closed thinking is emitted in full, marked last.
    pub fn finalize(&mut self) -> ThinkingParseResult {
        let mut result = ThinkingParseResult::default();

        if !self.buffer.is_empty() && !self.found_thinking {
            result.regular_content = std::mem::take(&mut self.buffer);
        }

        if self.in_thinking {
            result.thinking_content = self.process_for_output(
                &self.thinking_content.clone(),
                !self.first_thinking_sent,
                true,
            );
            result.is_last_thinking_chunk = true;
            self.in_thinking = false;
            self.thinking_ended = true;
        }

        result
    }

    pub fn found_thinking_block(&self) -> bool {
        self.found_thinking
    }
}

/// Paired close tag: `<x>` ↔ `</x>`, except the bare `alettek` marker which
/// closes with itself.
fn close_tag_for(open_tag: &str) -> String {
    if open_tag == "alettek" {
        return open_tag.to_string();
    }
    match open_tag.strip_prefix('<') {
        Some(rest) => format!("</{}", rest),
        None => open_tag.to_string(),
    }
}
