// Streaming pipeline: upstream byte stream → event-stream parser →
// thinking FSM → normalized events, with first-token and read timeouts,
// plus the collected (non-streaming) form and token accounting.

pub mod anthropic_sse;
pub mod openai_sse;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::convert::ToolCall;
use crate::parser::{
    deduplicate_tool_calls, parse_bracket_tool_calls, AwsEventStreamParser, ParserEvent,
    ThinkingParser,
};

/// Normalized event flowing from the upstream response to the framers.
#[derive(Debug, Clone, PartialEq)]
pub enum KiroEvent {
    Content(String),
    Thinking { text: String, first: bool, last: bool },
    ToolUse(ToolCall),
    Usage { credits: i64 },
    ContextUsage(f64),
}

#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("no response within {0:.0} seconds")]
    FirstTokenTimeout(f64),

    #[error("streaming read timed out after {0:.0} seconds")]
    ReadTimeout(f64),

    #[error("stream read error: {0}")]
    Read(String),
}

impl StreamError {
    /// First-token timeouts are eligible for a transparent retry; anything
    /// after bytes have flowed is not.
    pub fn is_first_token_timeout(&self) -> bool {
        matches!(self, Self::FirstTokenTimeout(_))
    }
}

/// Parse an upstream byte stream into normalized events.
///
/// Content events are piped through the thinking FSM (when enabled); other
/// event types bypass it. At end of stream the FSM is flushed, structured
/// tool calls are finalized, and the bracket-format fallback runs over the
/// accumulated text, merged through the shared deduplication.
pub fn kiro_event_stream<S, E>(
    byte_stream: S,
    enable_thinking_parser: bool,
    cfg: &Config,
) -> impl Stream<Item = Result<KiroEvent, StreamError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let first_token_timeout = cfg.first_token_timeout;
    let read_timeout = cfg.streaming_read_timeout;
    let reasoning_enabled = cfg.reasoning_enabled && enable_thinking_parser;
    let handling = cfg.reasoning_handling;
    let open_tags = cfg.reasoning_open_tags.clone();
    let buffer_size = cfg.reasoning_buffer_size;

    stream! {
        let mut parser = AwsEventStreamParser::new();
        let mut thinking = if reasoning_enabled {
            debug!("Thinking parser enabled (mode: {:?})", handling);
            Some(ThinkingParser::new(handling, &open_tags, buffer_size))
        } else {
            None
        };

        // Concatenated text output, scanned for bracket-format tool calls at EOF.
        let mut accumulated_text = String::new();
        futures::pin_mut!(byte_stream);
        let mut got_first = false;

        loop {
            let bound = if got_first { read_timeout } else { first_token_timeout };
            let chunk = match tokio::time::timeout(
                Duration::from_secs_f64(bound),
                byte_stream.next(),
            )
            .await
            {
                Err(_) => {
                    if got_first {
                        yield Err(StreamError::ReadTimeout(read_timeout));
                    } else {
                        yield Err(StreamError::FirstTokenTimeout(first_token_timeout));
                    }
                    return;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!("Stream chunk error: {}", e);
                    yield Err(StreamError::Read(e.to_string()));
                    return;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };
            got_first = true;

            for event in parser.feed(&chunk) {
                match event {
                    ParserEvent::Content(text) => {
                        match thinking {
                            Some(ref mut tp) => {
                                let result = tp.feed(&text);
                                if !result.thinking_content.is_empty() {
                                    accumulated_text.push_str(&result.thinking_content);
                                    yield Ok(KiroEvent::Thinking {
                                        text: result.thinking_content,
                                        first: result.is_first_thinking_chunk,
                                        last: result.is_last_thinking_chunk,
                                    });
                                }
                                if !result.regular_content.is_empty() {
                                    accumulated_text.push_str(&result.regular_content);
                                    yield Ok(KiroEvent::Content(result.regular_content));
                                }
                            }
                            None => {
                                accumulated_text.push_str(&text);
                                yield Ok(KiroEvent::Content(text));
                            }
                        }
                    }
                    ParserEvent::Usage { credits } => {
                        yield Ok(KiroEvent::Usage { credits });
                    }
                    ParserEvent::ContextUsage(pct) => {
                        yield Ok(KiroEvent::ContextUsage(pct));
                    }
                }
            }
        }

        // Flush the FSM: buffered prefix becomes content, un-closed thinking
        // is emitted in full, marked last.
        if let Some(ref mut tp) = thinking {
            let result = tp.finalize();
            if !result.thinking_content.is_empty() {
                accumulated_text.push_str(&result.thinking_content);
                yield Ok(KiroEvent::Thinking {
                    text: result.thinking_content,
                    first: result.is_first_thinking_chunk,
                    last: result.is_last_thinking_chunk,
                });
            }
            if !result.regular_content.is_empty() {
                accumulated_text.push_str(&result.regular_content);
                yield Ok(KiroEvent::Content(result.regular_content));
            }
        }

        // Structured tool calls, then the bracket-format fallback, merged
        // through the shared dedup.
        let mut tool_calls = parser.take_tool_calls();
        let bracket_calls = parse_bracket_tool_calls(&accumulated_text);
        if !bracket_calls.is_empty() {
            tool_calls.extend(bracket_calls);
            tool_calls = deduplicate_tool_calls(tool_calls);
        }
        for tc in tool_calls {
            yield Ok(KiroEvent::ToolUse(tc));
        }
    }
}

/// Fully collected stream result for non-streaming responses.
#[derive(Debug, Default, Clone)]
pub struct StreamResult {
    pub content: String,
    pub thinking_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub credits: Option<i64>,
    pub context_usage_percentage: Option<f64>,
}

/// Drain the whole event stream into a single result.
pub async fn collect_stream_result<S, E>(
    byte_stream: S,
    enable_thinking_parser: bool,
    cfg: &Config,
) -> Result<StreamResult, StreamError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let events = kiro_event_stream(byte_stream, enable_thinking_parser, cfg);
    futures::pin_mut!(events);

    let mut result = StreamResult::default();
    while let Some(event) = events.next().await {
        match event? {
            KiroEvent::Content(text) => result.content.push_str(&text),
            KiroEvent::Thinking { text, .. } => result.thinking_content.push_str(&text),
            KiroEvent::ToolUse(tc) => result.tool_calls.push(tc),
            KiroEvent::Usage { credits } => result.credits = Some(credits),
            KiroEvent::ContextUsage(pct) => result.context_usage_percentage = Some(pct),
        }
    }
    Ok(result)
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4) as u32
}

/// Derive prompt/total token counts from the upstream context usage
/// percentage and the model's max input tokens.
///
/// `total = floor(p/100 * max_input)`, `prompt = max(0, total - completion)`.
/// Without a percentage the totals fall back to the completion estimate.
pub fn calculate_tokens_from_context_usage(
    context_usage_percentage: Option<f64>,
    completion_tokens: u32,
    max_input_tokens: u32,
) -> (u32, u32) {
    match context_usage_percentage {
        Some(pct) if pct > 0.0 => {
            let total = ((pct / 100.0) * max_input_tokens as f64) as u32;
            let prompt = total.saturating_sub(completion_tokens);
            (prompt, total)
        }
        _ => (0, completion_tokens),
    }
}
