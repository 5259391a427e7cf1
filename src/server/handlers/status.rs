//! 服务信息端点

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::server::{AppState, SERVICE_NAME};

/// 健康检查
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 运行状态：活跃流、缓存与认证统计
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "status": "running",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "model": state.config.deepseek.model_name,
        "streams": state.registry.stats(),
        "active_streams": state.registry.active_streams(),
        "cache": state.cache.stats(),
        "auth": state.auth.stats()
    }))
}

/// 模型列表（只有配置的上游模型）
pub async fn models(State(state): State<AppState>) -> impl IntoResponse {
    let model = &state.config.deepseek.model_name;
    Json(serde_json::json!({
        "object": "list",
        "data": [{
            "id": model,
            "object": "model",
            "created": state.started_unix,
            "owned_by": "deepseek-ai",
            "root": model,
            "parent": null
        }]
    }))
}

/// 服务信息
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "messages": "/v1/messages",
            "models": "/v1/models",
            "health": "/health",
            "status": "/status"
        }
    }))
}
