//! Middleware 模块
//!
//! 提供 HTTP 请求处理的中间件组件

pub mod auth;
pub mod request_log;

pub use auth::{extract_credential, require_auth, AuthDecision, AuthManager, DenyReason};
pub use request_log::log_requests;
