//! Claude-DeepSeek 代理
//!
//! 接收 Anthropic Messages API 请求，转发到 OpenAI 兼容网关上的 DeepSeek 模型，
//! 再把响应（含流式 SSE）转换回 Anthropic 格式。
//!
//! # 模块结构
//!
//! - `config`: YAML 配置与环境变量覆盖
//! - `models`: Anthropic / OpenAI 数据模型
//! - `converter`: 请求与非流式响应转换
//! - `deepseek`: 任务识别、参数优化与思考模式
//! - `stream`: SSE 翻译器与流会话注册表
//! - `providers`: 上游网关客户端
//! - `middleware`: 认证、限流与请求日志
//! - `cache`: 非流式响应缓存
//! - `server`: 路由与处理器

pub mod cache;
pub mod config;
pub mod converter;
pub mod deepseek;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod server;
pub mod stream;

pub use config::Config;
pub use error::ProxyError;
pub use server::{build_router, run_server, AppState};
