//! OpenAI 非流式响应转换为 Anthropic 响应

use serde_json::Value;
use uuid::Uuid;

use crate::deepseek::parse_thinking_response;
use crate::models::anthropic::*;
use crate::models::openai::*;
use crate::stream::StopReason;

/// 将上游响应转换为 Anthropic MessagesResponse
///
/// 缺失字段一律退化为默认值，转换不会失败。
///
/// # 参数
/// - `response`: 上游响应
/// - `fallback_model`: 上游未返回 model 时使用的模型名
pub fn convert_openai_to_anthropic(
    response: ChatCompletionResponse,
    fallback_model: &str,
) -> AnthropicMessagesResponse {
    let id = format!(
        "msg_{}",
        response
            .id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
    );
    let model = response
        .model
        .unwrap_or_else(|| fallback_model.to_string());
    let usage = response.usage.unwrap_or_default();

    let choice = response.choices.into_iter().next().unwrap_or_default();
    let stop_reason = StopReason::from_openai(choice.finish_reason.as_deref());

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(ResponseContentBlock::Text {
            text: parse_thinking_response(&text).to_text(),
        });
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        if call.call_type != "function" {
            tracing::debug!("[CONVERT] 跳过非 function 工具调用: {}", call.call_type);
            continue;
        }
        content.push(convert_tool_call(call));
    }

    AnthropicMessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        model,
        content,
        stop_reason: stop_reason.to_anthropic_str().to_string(),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
    }
}

fn convert_tool_call(call: ToolCall) -> ResponseContentBlock {
    let input = decode_arguments(&call.function.name, &call.function.arguments);
    let id = if call.id.is_empty() {
        format!("toolu_{}", Uuid::new_v4().simple())
    } else {
        call.id
    };
    ResponseContentBlock::ToolUse {
        id,
        name: call.function.name,
        input,
    }
}

/// 解析工具参数，失败时返回空对象
fn decode_arguments(name: &str, arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(arguments) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("[CONVERT] 工具参数解析失败: tool={}, error={}", name, e);
            Value::Object(Default::default())
        }
    }
}
