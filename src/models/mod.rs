//! 协议数据模型
//!
//! - `anthropic`: 下游（客户端）Messages API
//! - `openai`: 上游（网关）Chat Completions API

pub mod anthropic;
pub mod openai;
