//! Anthropic SSE 生成器
//!
//! 将 `StreamEvent` 转换为下游 SSE 帧。
//!
//! # 格式说明
//!
//! 所有事件使用同一个事件名 `message`，JSON 使用紧凑编码：
//! ```text
//! event: message
//! data: {"type":"message_start","message":{...}}
//!
//! event: message
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! event: message
//! data: {"type":"message_stop"}
//! ```

use serde_json::{json, Value};

use crate::stream::events::{BlockDelta, ContentBlockType, StreamEvent};

/// SSE 事件名
pub const SSE_EVENT_NAME: &str = "message";

/// 将事件编码为 Anthropic JSON 负载
pub fn event_to_json(event: &StreamEvent) -> Value {
    match event {
        StreamEvent::MessageStart { id, model } => json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0}
            }
        }),

        StreamEvent::ContentBlockStart { index, block } => {
            let content_block = match block {
                ContentBlockType::Text => json!({"type": "text", "text": ""}),
                ContentBlockType::ToolUse { id, name } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": {}
                }),
            };
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": content_block
            })
        }

        StreamEvent::ContentBlockDelta { index, delta } => {
            let delta = match delta {
                BlockDelta::Text(text) => json!({"type": "text_delta", "text": text}),
                BlockDelta::InputJson(partial) => {
                    json!({"type": "input_json_delta", "partial_json": partial})
                }
            };
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": delta
            })
        }

        StreamEvent::ContentBlockStop { index } => json!({
            "type": "content_block_stop",
            "index": index
        }),

        StreamEvent::MessageDelta { stop_reason, usage } => {
            let usage = match usage {
                Some(usage) => json!({
                    "input_tokens": usage.input_tokens,
                    "output_tokens": usage.output_tokens
                }),
                None => json!({}),
            };
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": stop_reason.to_anthropic_str(),
                    "stop_sequence": null
                },
                "usage": usage
            })
        }

        StreamEvent::MessageStop => json!({"type": "message_stop"}),

        StreamEvent::Error {
            error_type,
            message,
        } => json!({
            "type": "error",
            "error": {"type": error_type, "message": message}
        }),
    }
}

/// 将事件编码为完整的 SSE 帧
pub fn format_sse(event: &StreamEvent) -> String {
    format!("event: {}\ndata: {}\n\n", SSE_EVENT_NAME, event_to_json(event))
}

/// Anthropic SSE 生成器
///
/// 无协议状态（顺序由 translator 保证），只记录已输出的事件数量。
#[derive(Debug, Default)]
pub struct AnthropicSseGenerator {
    events_emitted: u64,
}

impl AnthropicSseGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 将一组事件转换为 SSE 字符串列表
    pub fn generate(&mut self, events: &[StreamEvent]) -> Vec<String> {
        self.events_emitted += events.len() as u64;
        events.iter().map(format_sse).collect()
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::{StopReason, StreamUsage};

    fn payload(sse: &str) -> Value {
        let data = sse
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn test_frame_layout() {
        let sse = format_sse(&StreamEvent::MessageStop);
        assert_eq!(sse, "event: message\ndata: {\"type\":\"message_stop\"}\n\n");
    }

    #[test]
    fn test_message_start() {
        let sse = format_sse(&StreamEvent::MessageStart {
            id: "msg_1".to_string(),
            model: "deepseek-v3.1".to_string(),
        });
        let json = payload(&sse);
        assert_eq!(json["type"], "message_start");
        assert_eq!(json["message"]["id"], "msg_1");
        assert_eq!(json["message"]["role"], "assistant");
        assert_eq!(json["message"]["usage"]["input_tokens"], 0);
        assert_eq!(json["message"]["usage"]["output_tokens"], 0);
    }

    #[test]
    fn test_tool_use_block_start() {
        let json = event_to_json(&StreamEvent::ContentBlockStart {
            index: 1,
            block: ContentBlockType::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
            },
        });
        assert_eq!(json["index"], 1);
        assert_eq!(json["content_block"]["type"], "tool_use");
        assert_eq!(json["content_block"]["name"], "search");
        assert_eq!(json["content_block"]["input"], serde_json::json!({}));
    }

    #[test]
    fn test_input_json_delta_is_verbatim() {
        let json = event_to_json(&StreamEvent::ContentBlockDelta {
            index: 1,
            delta: BlockDelta::InputJson("{\"q\": \"ru".to_string()),
        });
        assert_eq!(json["delta"]["type"], "input_json_delta");
        assert_eq!(json["delta"]["partial_json"], "{\"q\": \"ru");
    }

    #[test]
    fn test_message_delta_usage() {
        let with_usage = event_to_json(&StreamEvent::MessageDelta {
            stop_reason: StopReason::ToolUse,
            usage: Some(StreamUsage {
                input_tokens: 3,
                output_tokens: 4,
            }),
        });
        assert_eq!(with_usage["delta"]["stop_reason"], "tool_use");
        assert_eq!(with_usage["usage"]["output_tokens"], 4);

        let without = event_to_json(&StreamEvent::MessageDelta {
            stop_reason: StopReason::EndTurn,
            usage: None,
        });
        assert_eq!(without["usage"], serde_json::json!({}));
    }

    #[test]
    fn test_error_event() {
        let json = event_to_json(&StreamEvent::generic_error());
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["type"], "api_error");
        assert_eq!(json["error"]["message"], "Streaming error occurred");
    }

    #[test]
    fn test_generator_counts_events() {
        let mut generator = AnthropicSseGenerator::new();
        let frames = generator.generate(&[
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageStop,
        ]);
        assert_eq!(frames.len(), 2);
        assert_eq!(generator.events_emitted(), 2);
        assert!(frames.iter().all(|f| f.starts_with("event: message\ndata: ")));
    }
}
