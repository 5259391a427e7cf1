//! 请求日志中间件

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

/// 记录方法、路径、状态码与耗时
///
/// 流式响应在响应头返回时即记录，耗时不包含流的持续时间。
pub async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "[SERVER] 收到请求"
    );

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "[SERVER] 请求完成"
    );

    response
}
