//! Anthropic 请求转换为 OpenAI Chat Completions 请求
//!
//! 只保留上游能理解的内容：文本、工具调用与工具结果。
//! 图片等其他内容块直接丢弃，转换本身不会失败。

use uuid::Uuid;

use crate::config::DeepSeekConfig;
use crate::deepseek::{apply_features, FeatureDecision};
use crate::models::anthropic::*;
use crate::models::openai::*;

/// 转换结果：上游请求与特性决策
#[derive(Debug, Clone)]
pub struct ConvertedRequest {
    pub request: ChatCompletionRequest,
    pub decision: FeatureDecision,
}

/// 将 Anthropic MessagesRequest 转换为上游请求
///
/// 转换后立即应用任务参数表与思考模式开关。
///
/// # 参数
/// - `request`: 客户端请求
/// - `config`: DeepSeek 配置（模型名、默认参数）
pub fn convert_anthropic_to_openai(
    request: &AnthropicMessagesRequest,
    config: &DeepSeekConfig,
) -> ConvertedRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(ChatMessage::new("system", system.text()));
    }
    messages.extend(request.messages.iter().filter_map(convert_message));

    let tools = request.tools.as_ref().map(|tools| {
        tools.iter().map(convert_tool).collect::<Vec<_>>()
    });
    let tool_choice = tools.as_ref().map(|_| "auto".to_string());

    let mut upstream = ChatCompletionRequest {
        model: config.model_name.clone(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(config.max_tokens),
        temperature: request.temperature.unwrap_or(config.temperature),
        top_p: request.top_p,
        frequency_penalty: None,
        presence_penalty: None,
        stream: request.stream,
        tools,
        tool_choice,
        stop: request.stop_sequences.clone(),
        extra_body: None,
    };

    tracing::debug!(
        "[CONVERT] Anthropic -> OpenAI: messages={}, tools={}, stream={}",
        upstream.messages.len(),
        upstream.tool_count(),
        upstream.stream
    );

    let decision = apply_features(&mut upstream, request.explicit_thinking(), config);

    ConvertedRequest {
        request: upstream,
        decision,
    }
}

/// 转换单条消息，未知角色返回 None
fn convert_message(message: &AnthropicMessage) -> Option<ChatMessage> {
    match message.role.as_str() {
        "user" => Some(ChatMessage::new("user", message.content.text())),
        "assistant" => {
            let mut converted = ChatMessage::new("assistant", message.content.text());
            let tool_calls: Vec<ToolCall> = message
                .content
                .tool_uses()
                .into_iter()
                .filter_map(convert_tool_use)
                .collect();
            if !tool_calls.is_empty() {
                converted.tool_calls = Some(tool_calls);
            }
            Some(converted)
        }
        "tool" => {
            let mut converted = ChatMessage::new("tool", message.content.text());
            converted.tool_call_id = Some(
                message
                    .tool_use_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            );
            Some(converted)
        }
        other => {
            tracing::warn!("[CONVERT] 跳过未知角色消息: {}", other);
            None
        }
    }
}

fn convert_tool_use(block: &ContentBlock) -> Option<ToolCall> {
    match block {
        ContentBlock::ToolUse { id, name, input } => {
            // null 输入按空对象处理
            let arguments = if input.is_null() {
                "{}".to_string()
            } else {
                input.to_string()
            };
            Some(ToolCall {
                id: id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments,
                },
            })
        }
        _ => None,
    }
}

fn convert_tool(tool: &AnthropicTool) -> OpenAiTool {
    OpenAiTool {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters: tool.input_schema.clone(),
        },
    }
}
