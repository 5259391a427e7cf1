//! Provider Trait 定义
//!
//! 上游调用的统一接口：非流式返回完整响应，流式返回字节流。

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};

/// 上游字节流
pub type StreamResponse = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Provider 错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 连接失败或请求未发出
    #[error("上游连接失败: {0}")]
    Transport(String),

    /// 请求超时
    #[error("上游请求超时")]
    Timeout,

    /// 上游返回非成功状态码
    #[error("上游返回错误状态: {status} - {body}")]
    Status { status: u16, body: String },

    /// 响应体无法解析
    #[error("上游响应解析失败: {0}")]
    Decode(String),

    /// 未配置上游
    #[error("上游未配置: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// 从 reqwest 错误构造
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Timeout
        } else if error.is_decode() {
            ProviderError::Decode(error.to_string())
        } else {
            ProviderError::Transport(error.to_string())
        }
    }

    /// 从 HTTP 状态码构造
    pub fn from_http_status(status: u16, body: &str) -> Self {
        ProviderError::Status {
            status,
            body: body.to_string(),
        }
    }

    /// 上游状态码（仅 `Status` 变体）
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 对话补全 Provider
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 非流式调用
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError>;

    /// 流式调用
    ///
    /// 只有在上游返回成功状态后才返回字节流；状态错误在此处直接返回。
    async fn stream(&self, request: &ChatCompletionRequest) -> Result<StreamResponse, ProviderError>;

    /// Provider 名称（用于日志）
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        let error = ProviderError::from_http_status(429, "slow down");
        assert_eq!(error.upstream_status(), Some(429));
        assert!(error.to_string().contains("429"));
    }

    #[test]
    fn test_non_status_errors_have_no_status() {
        assert_eq!(ProviderError::Timeout.upstream_status(), None);
        assert_eq!(
            ProviderError::Transport("reset".to_string()).upstream_status(),
            None
        );
    }
}
