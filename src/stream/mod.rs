//! 流式处理层
//!
//! 把上游 OpenAI 兼容网关的 SSE 流转换为下游 Anthropic SSE 流。
//!
//! # 架构设计
//!
//! ```text
//! 上游字节流 ──> [OpenAiSseParser] ──> UpstreamFrame ──> [StreamTranslator]
//!            ──> StreamEvent ──> [AnthropicSseGenerator] ──> 下游 SSE
//! ```
//!
//! 并发流数量由 [`registry::StreamRegistry`] 控制。
//!
//! # 模块结构
//!
//! - `events`: 下游流事件类型 (`StreamEvent`) 与结束原因映射
//! - `parsers`: 上游 SSE 行解析
//! - `translator`: 事件状态机
//! - `generators`: 下游 SSE 帧生成
//! - `pipeline`: 同步管道与异步拉取循环
//! - `registry`: 流会话注册表

pub mod events;
pub mod generators;
pub mod parsers;
pub mod pipeline;
pub mod registry;
pub mod translator;


// 重新导出核心类型
pub use events::{BlockDelta, ContentBlockType, StopReason, StreamEvent, StreamUsage};
pub use generators::AnthropicSseGenerator;
pub use parsers::{OpenAiSseParser, UpstreamFrame};
pub use pipeline::{create_sse_stream, PipelineConfig, StreamPipeline};
pub use registry::{RegistryConfig, RegistryError, StreamHandle, StreamRegistry, StreamSnapshot};
pub use translator::{new_stream_id, StreamPhase, StreamState, StreamTranslator};
