pub mod event_stream;
pub mod thinking;
pub mod tool_calls;

pub use event_stream::{AwsEventStreamParser, ParserEvent};
pub use thinking::{ThinkingParseResult, ThinkingParser};
pub use tool_calls::{deduplicate_tool_calls, find_matching_brace, parse_bracket_tool_calls};
