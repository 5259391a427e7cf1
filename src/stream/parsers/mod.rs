//! 上游流解析器
//!
//! 把上游 OpenAI 兼容网关的 SSE 字节流解析为 `UpstreamFrame`。

pub mod openai_sse;

pub use openai_sse::{parse_line, OpenAiSseParser, UpstreamFrame};
