//! OpenAI 兼容网关 Provider
//!
//! 通过 `POST {base_url}/chat/completions` 调用部署在 OpenAI 兼容网关后的 DeepSeek 模型。

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

use crate::config::OpenAiConfig;
use crate::logger::sanitize_log_message;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};

use super::traits::{ChatProvider, ProviderError, StreamResponse};

/// OpenAI 兼容网关 Provider
#[derive(Debug, Clone)]
pub struct OpenAiGatewayProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiGatewayProvider {
    /// 根据配置创建 Provider
    ///
    /// 连接超时与请求超时取自配置。
    pub fn new(config: &OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Transport(format!("客户端构建失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// 拼接接口地址
    pub fn build_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    async fn send(
        &self,
        request: &ChatCompletionRequest,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured("openai.base_url".to_string()));
        }

        let url = self.build_url("chat/completions");
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        if streaming {
            builder = builder.header("Accept", "text/event-stream");
        }

        tracing::info!(
            "[UPSTREAM] 发起请求: url={} model={} stream={}",
            url,
            request.model,
            streaming
        );

        let resp = builder
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                "[UPSTREAM] 请求失败: {} - {}",
                status,
                sanitize_log_message(&body)
            );
            return Err(ProviderError::from_http_status(status.as_u16(), &body));
        }

        Ok(resp)
    }
}

#[async_trait]
impl ChatProvider for OpenAiGatewayProvider {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let resp = self.send(request, false).await?;
        resp.json::<ChatCompletionResponse>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn stream(&self, request: &ChatCompletionRequest) -> Result<StreamResponse, ProviderError> {
        let resp = self.send(request, true).await?;
        tracing::info!("[UPSTREAM] 流式响应开始: status={}", resp.status());

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProviderError::from_reqwest_error(&e)));
        Ok(Box::pin(stream))
    }

    fn provider_name(&self) -> &'static str {
        "OpenAiGatewayProvider"
    }
}
