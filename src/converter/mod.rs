//! 协议转换模块
//!
//! - `anthropic_to_openai`: 客户端请求 → 上游请求
//! - `openai_to_anthropic`: 上游非流式响应 → 客户端响应
//!
//! 流式响应的转换在 `stream` 模块中完成。

pub mod anthropic_to_openai;
pub mod openai_to_anthropic;

pub use anthropic_to_openai::{convert_anthropic_to_openai, ConvertedRequest};
pub use openai_to_anthropic::convert_openai_to_anthropic;
