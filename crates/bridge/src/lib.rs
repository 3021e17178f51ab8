//! Anthropic ↔ OpenAI format bridge
//!
//! Translates Anthropic Messages API bodies to the OpenAI Chat Completions
//! schema and back, for fallback providers that only speak the latter.
//! Bodies are handled as `serde_json::Value` so fields the bridge does not
//! understand pass through untouched.
//!
//! - `request`: Anthropic request → OpenAI request
//! - `response`: OpenAI response → Anthropic response (non-streaming)
//! - `stream`: OpenAI SSE chunks → Anthropic SSE events, incrementally
//! - `schema`: JSON Schema cleanup for Gemini-style gateways

pub mod request;
pub mod response;
pub mod schema;
pub mod stream;

pub use request::anthropic_to_openai;
pub use response::openai_to_anthropic;
pub use schema::normalize_for_gemini;
pub use stream::{SseTranslator, translate_sse};

/// Map an OpenAI `finish_reason` onto an Anthropic `stop_reason`.
pub fn map_finish_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        // "stop", "content_filter", and anything unrecognized
        _ => "end_turn",
    }
}
