//! HTTP 服务
//!
//! 路由：
//! - `POST /v1/messages`（需认证）
//! - `GET /v1/models`（需认证）
//! - `GET /health`、`GET /status`、`GET /`
//!
//! 所有进程级状态集中在 [`AppState`]，启动时创建，关闭时随任务一起释放。

pub mod handlers;


use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::middleware::auth::RATE_LIMIT_WINDOW;
use crate::middleware::{log_requests, require_auth, AuthManager};
use crate::providers::{ChatProvider, OpenAiGatewayProvider, ProviderError};
use crate::stream::{RegistryConfig, StreamRegistry};

/// 服务名称
pub const SERVICE_NAME: &str = "Claude-DeepSeek Proxy";

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub cache: Arc<ResponseCache>,
    pub registry: StreamRegistry,
    pub provider: Arc<dyn ChatProvider>,
    pub started_at: Instant,
    /// 启动时间（Unix 秒）
    pub started_unix: i64,
}

impl AppState {
    /// 使用网关 Provider 创建
    pub fn new(config: Config) -> Result<Self, ProviderError> {
        let provider = OpenAiGatewayProvider::new(&config.openai)?;
        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    /// 使用指定 Provider 创建
    pub fn with_provider(config: Config, provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            auth: Arc::new(AuthManager::new(&config.auth)),
            cache: Arc::new(ResponseCache::new(&config.cache)),
            registry: StreamRegistry::new(RegistryConfig::from(&config.streaming)),
            provider,
            config: Arc::new(config),
            started_at: Instant::now(),
            started_unix: chrono::Utc::now().timestamp(),
        }
    }

    /// 启动后台任务：流回收、限流记录清理与缓存清理
    pub fn spawn_background_tasks(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let streaming = &self.config.streaming;
        let mut tasks = vec![
            self.registry.spawn_sweeper(
                Duration::from_secs(streaming.sweep_interval_secs.max(1)),
                Duration::from_secs(streaming.stale_after_secs),
                shutdown.clone(),
            ),
            self.auth.spawn_cleanup(RATE_LIMIT_WINDOW, shutdown.clone()),
        ];
        if self.cache.is_enabled() {
            tasks.push(self.cache.spawn_cleanup(
                Duration::from_secs(self.config.cache.cleanup_interval_secs.max(1)),
                shutdown.clone(),
            ));
        }
        tasks
    }
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    let protected = Router::new()
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/models", get(handlers::models))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_auth,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/", get(handlers::root))
        .layer(middleware::from_fn(log_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 运行服务直到 `shutdown` 被取消
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let address = state.config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("[SERVER] 服务启动: http://{}", address);

    let registry = state.registry.clone();
    let router = build_router(state);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // 拒绝新流，进行中的流走错误路径收尾
            registry.close();
            tracing::info!("[SERVER] 收到停止信号，等待连接结束");
        })
        .await;

    tracing::info!("[SERVER] 服务已停止");
    result
}
