//! Creation stream handling
//!
//! `sse` reassembles event payloads from transport chunks, `parser`
//! classifies each payload into a protocol event.

mod parser;
mod sse;

pub use parser::{parse_line, StreamEvent, DONE_SENTINEL, ERROR_SENTINEL};
pub use sse::{sse_lines, SseDecoder};
