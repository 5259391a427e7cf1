//! 下游流事件类型
//!
//! 定义 Anthropic 流式协议的中间表示，用于解耦状态机 (translator)
//! 和 SSE 输出 (generators)。
//!
//! # 设计原则
//!
//! - Translator 输出 `StreamEvent`
//! - Generator 消费 `StreamEvent` 生成 `event: message` SSE 帧
//! - 序列化边界使用穷尽匹配，不存在静默丢弃的字段

use serde::{Deserialize, Serialize};

use crate::models::openai::Usage;

/// 流错误的固定类型，不向客户端暴露内部细节
pub const STREAM_ERROR_TYPE: &str = "api_error";
/// 流错误的固定消息
pub const STREAM_ERROR_MESSAGE: &str = "Streaming error occurred";

/// 下游流事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// 消息开始（usage 恒为 0）
    MessageStart {
        /// 消息 ID（`msg_` 前缀）
        id: String,
        /// 模型名称
        model: String,
    },

    /// 内容块开始
    ContentBlockStart {
        /// 内容块索引（0 = 文本，1 = 工具调用）
        index: u32,
        /// 内容块类型
        block: ContentBlockType,
    },

    /// 内容块增量
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },

    /// 内容块结束
    ContentBlockStop {
        index: u32,
    },

    /// 消息增量（携带停止原因）
    MessageDelta {
        stop_reason: StopReason,
        /// 上游帧自带的 usage，缺省时序列化为空对象
        usage: Option<StreamUsage>,
    },

    /// 消息结束
    MessageStop,

    /// 错误事件
    Error {
        error_type: String,
        message: String,
    },
}

impl StreamEvent {
    /// 通用流错误事件
    pub fn generic_error() -> Self {
        StreamEvent::Error {
            error_type: STREAM_ERROR_TYPE.to_string(),
            message: STREAM_ERROR_MESSAGE.to_string(),
        }
    }

    /// Anthropic 协议中的 `type` 字段
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// 事件引用的内容块索引
    pub fn block_index(&self) -> Option<u32> {
        match self {
            StreamEvent::ContentBlockStart { index, .. }
            | StreamEvent::ContentBlockDelta { index, .. }
            | StreamEvent::ContentBlockStop { index } => Some(*index),
            _ => None,
        }
    }
}

/// 内容块类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentBlockType {
    /// 文本内容
    Text,
    /// 工具调用
    ToolUse {
        /// 工具调用 ID
        id: String,
        /// 工具名称
        name: String,
    },
}

/// 内容块增量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockDelta {
    /// 文本增量
    Text(String),
    /// 工具参数片段（原样转发，单个片段不一定是合法 JSON）
    InputJson(String),
}

/// `message_delta` 中的 token 使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<Usage> for StreamUsage {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    /// 正常结束
    #[default]
    EndTurn,
    /// 达到最大 token 数
    MaxTokens,
    /// 需要工具调用
    ToolUse,
    /// 停止序列 / 内容过滤
    StopSequence,
}

impl StopReason {
    /// 从 OpenAI finish_reason 映射
    ///
    /// 纯查表函数，缺省或无法识别的值一律映射为 `EndTurn`。
    pub fn from_openai(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::EndTurn,
            Some("length") => Self::MaxTokens,
            Some("function_call") | Some("tool_calls") => Self::ToolUse,
            Some("content_filter") => Self::StopSequence,
            _ => Self::EndTurn,
        }
    }

    /// 转换为 Anthropic 格式的字符串
    pub fn to_anthropic_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::ToolUse => "tool_use",
            Self::StopSequence => "stop_sequence",
        }
    }
}
