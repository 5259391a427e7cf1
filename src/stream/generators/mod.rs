//! SSE 流生成器
//!
//! 将 `StreamEvent` 转换为下游 Anthropic SSE 格式。

pub mod anthropic_sse;

pub use anthropic_sse::{event_to_json, format_sse, AnthropicSseGenerator};
