//! 请求处理错误
//!
//! 面向客户端的错误类型。`Display` 带内部细节，只用于日志；
//! 响应体只包含 [`ProxyError::public_message`] 给出的通用描述。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::stream::RegistryError;

/// 处理错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// 请求体无效
    #[error("请求无效: {0}")]
    InvalidRequest(String),

    /// 认证失败
    #[error("认证失败: {0}")]
    AuthError(String),

    /// 超出限流
    #[error("请求过于频繁")]
    RateLimited,

    /// 流槽位已满
    #[error("流槽位已满: {0}")]
    Overloaded(String),

    /// 上游返回非成功状态
    #[error("上游返回错误: {status}")]
    UpstreamStatus { status: u16 },

    /// 上游不可达或响应无效
    #[error("上游调用失败: {0}")]
    UpstreamError(String),

    /// 上游超时
    #[error("上游请求超时")]
    Timeout,

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ProxyError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) => 400,
            ProxyError::AuthError(_) => 401,
            ProxyError::RateLimited => 429,
            ProxyError::Overloaded(_) => 529,
            // 上游 4xx/5xx 原样透传，其他状态按网关错误处理
            ProxyError::UpstreamStatus { status } if (400..600).contains(status) => *status,
            ProxyError::UpstreamStatus { .. } => 502,
            ProxyError::UpstreamError(_) => 502,
            ProxyError::Timeout => 504,
            ProxyError::InternalError(_) => 500,
        }
    }

    /// 获取错误类型字符串
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::AuthError(_) => "authentication_error",
            ProxyError::RateLimited => "rate_limit_error",
            ProxyError::Overloaded(_) => "overloaded_error",
            ProxyError::UpstreamStatus { .. }
            | ProxyError::UpstreamError(_)
            | ProxyError::Timeout
            | ProxyError::InternalError(_) => "api_error",
        }
    }

    /// 返回给客户端的描述
    pub fn public_message(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "Invalid request body",
            ProxyError::AuthError(_) => "Invalid API key",
            ProxyError::RateLimited => "Rate limit exceeded",
            ProxyError::Overloaded(_) => "Too many concurrent streams",
            ProxyError::UpstreamStatus { .. } => "Upstream request failed",
            ProxyError::UpstreamError(_) => "Upstream service error",
            ProxyError::Timeout => "Upstream request timed out",
            ProxyError::InternalError(_) => "Internal server error",
        }
    }

    /// 转换为 Anthropic 风格的 JSON 错误体
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.public_message()
            }
        })
    }

    /// 记录带上下文的错误日志
    pub fn log_with_context(&self, request_id: &str) {
        tracing::error!(
            request_id = %request_id,
            error_type = %self.error_type(),
            error_message = %self,
            "[SERVER] 请求处理失败"
        );
    }
}

impl From<ProviderError> for ProxyError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Status { status, .. } => ProxyError::UpstreamStatus { status },
            ProviderError::Timeout => ProxyError::Timeout,
            ProviderError::NotConfigured(what) => {
                ProxyError::InternalError(format!("上游未配置: {}", what))
            }
            other => ProxyError::UpstreamError(other.to_string()),
        }
    }
}

impl From<RegistryError> for ProxyError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Busy { .. } => ProxyError::Overloaded(error.to_string()),
            other => ProxyError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ProxyError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(ProxyError::AuthError("x".into()).status_code(), 401);
        assert_eq!(ProxyError::RateLimited.status_code(), 429);
        assert_eq!(ProxyError::Overloaded("x".into()).status_code(), 529);
        assert_eq!(ProxyError::UpstreamStatus { status: 403 }.status_code(), 403);
        assert_eq!(ProxyError::UpstreamStatus { status: 302 }.status_code(), 502);
        assert_eq!(ProxyError::Timeout.status_code(), 504);
    }

    #[test]
    fn test_json_hides_internal_detail() {
        let error = ProxyError::UpstreamError("connection reset by 10.0.0.7".to_string());
        let json = error.to_json();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["type"], "api_error");
        assert_eq!(json["error"]["message"], "Upstream service error");
        assert!(!json.to_string().contains("10.0.0.7"));
    }

    #[test]
    fn test_from_provider_error() {
        let error: ProxyError = ProviderError::from_http_status(429, "secret body").into();
        assert_eq!(error, ProxyError::UpstreamStatus { status: 429 });
        assert!(!error.to_json().to_string().contains("secret body"));

        let error: ProxyError = ProviderError::Timeout.into();
        assert_eq!(error.status_code(), 504);
    }

    #[test]
    fn test_from_registry_error() {
        let error: ProxyError = RegistryError::Busy { max: 10 }.into();
        assert_eq!(error.error_type(), "overloaded_error");
        let error: ProxyError = RegistryError::Closed.into();
        assert_eq!(error.status_code(), 500);
    }

    #[test]
    fn test_into_response_status() {
        let response = ProxyError::AuthError("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = ProxyError::Overloaded("full".into()).into_response();
        assert_eq!(response.status().as_u16(), 529);
    }
}
