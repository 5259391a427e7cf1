//! `/v1/messages` 处理器
//!
//! 请求流程：
//! 1. 解析 Anthropic 请求并转换为上游请求（含任务参数与思考模式）
//! 2. 流式：申请流槽位 → 调用上游 → 返回 SSE 流
//! 3. 非流式：查缓存 → 调用上游 → 转换响应 → 写缓存
//!
//! 上游在开始流式传输前返回错误状态时，直接返回 JSON 错误响应，不输出任何 SSE 事件。

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::converter::{convert_anthropic_to_openai, convert_openai_to_anthropic};
use crate::error::ProxyError;
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::models::openai::ChatCompletionRequest;
use crate::server::AppState;
use crate::stream::{create_sse_stream, new_stream_id, PipelineConfig};

/// 处理 Anthropic Messages 请求
pub async fn messages(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4().to_string();
    match handle_messages(&state, &body, &request_id).await {
        Ok(response) => response,
        Err(error) => {
            error.log_with_context(&request_id);
            error.into_response()
        }
    }
}

async fn handle_messages(
    state: &AppState,
    body: &[u8],
    request_id: &str,
) -> Result<Response, ProxyError> {
    let request: AnthropicMessagesRequest = serde_json::from_slice(body)
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
    if request.messages.is_empty() {
        return Err(ProxyError::InvalidRequest("messages 不能为空".to_string()));
    }

    tracing::info!(
        request_id = %request_id,
        stream = request.stream,
        tools = request.tool_count(),
        client_model = request.model.as_deref().unwrap_or("-"),
        "[SERVER] 处理 messages 请求"
    );

    let converted = convert_anthropic_to_openai(&request, &state.config.deepseek);
    if converted.request.stream {
        stream_messages(state, converted.request, request_id).await
    } else {
        complete_messages(state, converted.request, request_id).await
    }
}

async fn stream_messages(
    state: &AppState,
    upstream: ChatCompletionRequest,
    request_id: &str,
) -> Result<Response, ProxyError> {
    let stream_id = new_stream_id();
    // 先占槽位再连接上游；上游失败时句柄随错误返回被 drop，槽位自动归还
    let handle = state.registry.admit(stream_id.clone()).await?;
    let byte_stream = state.provider.stream(&upstream).await?;

    tracing::info!(
        request_id = %request_id,
        stream_id = %stream_id,
        "[SERVER] 开始流式响应"
    );

    let config = PipelineConfig::new(stream_id, state.config.deepseek.model_name.clone());
    let sse_stream = create_sse_stream(byte_stream, config, handle);
    Ok(sse_response(Body::from_stream(sse_stream)))
}

async fn complete_messages(
    state: &AppState,
    upstream: ChatCompletionRequest,
    request_id: &str,
) -> Result<Response, ProxyError> {
    let cacheable = state.cache.should_cache(&upstream);
    let cache_key = ResponseCache::cache_key(&upstream);
    if cacheable {
        if let Some(cached) = state.cache.get(&cache_key) {
            tracing::info!(request_id = %request_id, "[SERVER] 使用缓存响应");
            return Ok(Json(cached).into_response());
        }
    }

    let response = state.provider.complete(&upstream).await?;
    let converted = convert_openai_to_anthropic(response, &state.config.deepseek.model_name);

    tracing::info!(
        request_id = %request_id,
        total_tokens = converted.usage.total_tokens,
        stop_reason = %converted.stop_reason,
        "[SERVER] 请求处理完成"
    );

    if cacheable {
        state.cache.store(cache_key, &upstream, converted.clone());
    }
    Ok(Json(converted).into_response())
}

/// 构建 SSE 响应
pub fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| {
            ProxyError::InternalError("构建流式响应失败".to_string()).into_response()
        })
}
