//! 流式协议转换状态机
//!
//! 把上游 `ChatCompletionChunk` 逐帧转换为 Anthropic `StreamEvent`。
//!
//! # 状态
//!
//! ```text
//! Idle ──start──> Opened ──首帧──> Streaming ──finish──> Closing ──> Closed
//!   └──────────────────────── fail ─────────────────────────────────┘
//! ```
//!
//! # 保证
//!
//! - `message_start` 与 `content_block_start(0)` 在读取上游之前发出
//! - 每个索引的 `content_block_start` 至多一次，且先于该索引的任何 delta
//! - 关闭序列（`content_block_stop` → `message_stop`）恰好一次，出错时同样发出
//! - 每帧至多匹配一类事件（文本 / 工具 / 结束原因），先匹配者生效

use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::openai::{ChatCompletionChunk, ToolCallDelta};
use crate::stream::events::{BlockDelta, ContentBlockType, StopReason, StreamEvent, StreamUsage};

/// 文本内容块索引
pub const TEXT_BLOCK_INDEX: u32 = 0;
/// 工具调用内容块索引
pub const TOOL_BLOCK_INDEX: u32 = 1;

/// 状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Opened,
    Streaming,
    Closing,
    Closed,
}

/// 已打开的工具调用块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBlock {
    pub id: String,
    pub name: String,
}

/// 单个流的转换状态
#[derive(Debug, Clone)]
pub struct StreamState {
    /// 流 ID（同时作为下游消息 ID）
    pub stream_id: String,
    /// 当前阶段
    pub phase: StreamPhase,
    /// 文本块（索引 0）是否已打开
    pub content_block_open: bool,
    /// 工具块（索引 1）
    pub tool_block: Option<ToolBlock>,
    /// 已处理的上游帧数量
    pub chunks_processed: u64,
    /// 开始时间
    pub started_at: Instant,
}

impl StreamState {
    fn new(stream_id: String) -> Self {
        Self {
            stream_id,
            phase: StreamPhase::Idle,
            content_block_open: false,
            tool_block: None,
            chunks_processed: 0,
            started_at: Instant::now(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == StreamPhase::Closed
    }
}

/// 生成下游消息 ID
pub fn new_stream_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// 流式协议转换器
#[derive(Debug)]
pub struct StreamTranslator {
    state: StreamState,
    model: String,
}

impl StreamTranslator {
    /// 创建转换器
    ///
    /// # 参数
    /// - `stream_id`: 流 ID，作为 `message_start` 中的消息 ID
    /// - `model`: 下游显示的模型名称
    pub fn new(stream_id: String, model: String) -> Self {
        Self {
            state: StreamState::new(stream_id),
            model,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn phase(&self) -> StreamPhase {
        self.state.phase
    }

    /// `Idle → Opened`：发出 `message_start` 和文本块 `content_block_start`
    ///
    /// 非 `Idle` 阶段调用时不产生事件。
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.state.phase != StreamPhase::Idle {
            return Vec::new();
        }
        self.state.phase = StreamPhase::Opened;
        self.state.content_block_open = true;

        vec![
            StreamEvent::MessageStart {
                id: self.state.stream_id.clone(),
                model: self.model.clone(),
            },
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                block: ContentBlockType::Text,
            },
        ]
    }

    /// 处理一个上游帧
    ///
    /// # 返回
    ///
    /// 0 到 2 个事件；没有可识别增量的帧返回空列表。
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match self.state.phase {
            StreamPhase::Idle => {
                events.extend(self.start());
                self.state.phase = StreamPhase::Streaming;
            }
            StreamPhase::Opened => self.state.phase = StreamPhase::Streaming,
            StreamPhase::Streaming => {}
            StreamPhase::Closing | StreamPhase::Closed => {
                debug!(
                    "[STREAM] 流已关闭，忽略上游帧: stream_id={}",
                    self.state.stream_id
                );
                return events;
            }
        }
        self.state.chunks_processed += 1;

        let choice = match chunk.first_choice() {
            Some(choice) => choice,
            None => {
                debug!(
                    "[STREAM] 上游帧没有 choices，跳过: stream_id={}",
                    self.state.stream_id
                );
                return events;
            }
        };

        let delta = choice.delta.as_ref();

        // 文本增量
        if let Some(text) = delta
            .and_then(|d| d.content.as_deref())
            .filter(|text| !text.is_empty())
        {
            events.push(StreamEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: BlockDelta::Text(text.to_string()),
            });
            return events;
        }

        // 工具调用增量
        if let Some(tool_call) = delta
            .and_then(|d| d.tool_calls.as_ref())
            .and_then(|calls| calls.first())
        {
            events.extend(self.process_tool_delta(tool_call));
            return events;
        }

        // 结束原因
        if let Some(reason) = choice.finish_reason.as_deref() {
            events.push(StreamEvent::MessageDelta {
                stop_reason: StopReason::from_openai(Some(reason)),
                usage: chunk.usage.map(StreamUsage::from),
            });
            return events;
        }

        debug!(
            "[STREAM] 上游帧没有可识别的增量，跳过: stream_id={}",
            self.state.stream_id
        );
        events
    }

    fn process_tool_delta(&mut self, tool_call: &ToolCallDelta) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let function = match tool_call.function.as_ref() {
            Some(function) => function,
            None => return events,
        };

        if let Some(name) = function.name.as_deref().filter(|name| !name.is_empty()) {
            match &self.state.tool_block {
                None => {
                    let id = tool_call
                        .id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple()));
                    self.state.tool_block = Some(ToolBlock {
                        id: id.clone(),
                        name: name.to_string(),
                    });
                    events.push(StreamEvent::ContentBlockStart {
                        index: TOOL_BLOCK_INDEX,
                        block: ContentBlockType::ToolUse {
                            id,
                            name: name.to_string(),
                        },
                    });
                }
                Some(open) => {
                    warn!(
                        "[STREAM] 只支持单个工具块，忽略后续工具调用: stream_id={}, open={}, ignored={}",
                        self.state.stream_id, open.name, name
                    );
                }
            }
        }

        if let Some(arguments) = function.arguments.as_deref().filter(|a| !a.is_empty()) {
            if self.state.tool_block.is_some() {
                events.push(StreamEvent::ContentBlockDelta {
                    index: TOOL_BLOCK_INDEX,
                    delta: BlockDelta::InputJson(arguments.to_string()),
                });
            } else {
                warn!(
                    "[STREAM] 工具参数早于工具名称到达，已丢弃: stream_id={}",
                    self.state.stream_id
                );
            }
        }

        events
    }

    /// 上游结束：发出关闭序列
    ///
    /// 已关闭时不产生事件。
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.state.is_closed() {
            return Vec::new();
        }
        let mut events = self.start();
        events.extend(self.close_sequence());
        events
    }

    /// 不可恢复错误：发出通用 `error` 事件，再发出关闭序列
    ///
    /// 已关闭时不产生事件。
    pub fn fail(&mut self) -> Vec<StreamEvent> {
        if self.state.is_closed() {
            return Vec::new();
        }
        let mut events = self.start();
        events.push(StreamEvent::generic_error());
        events.extend(self.close_sequence());
        events
    }

    fn close_sequence(&mut self) -> Vec<StreamEvent> {
        self.state.phase = StreamPhase::Closing;
        let mut events = Vec::with_capacity(3);
        if self.state.tool_block.is_some() {
            events.push(StreamEvent::ContentBlockStop {
                index: TOOL_BLOCK_INDEX,
            });
        }
        if self.state.content_block_open {
            events.push(StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
        }
        events.push(StreamEvent::MessageStop);
        self.state.phase = StreamPhase::Closed;
        events
    }
}
