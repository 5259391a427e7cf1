//! API Key 认证与限流
//!
//! - 密钥只以 SHA-256 摘要保存，比对使用常量时间比较
//! - `require_api_key = false` 时跳过密钥校验（仍然限流）
//! - 每个调用方一分钟滑动窗口限流，窗口内没有请求的调用方由清理任务移除

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AuthConfig;
use crate::error::ProxyError;

/// 限流窗口
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// 放行响应上的剩余次数头
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// 跟踪的调用方超过该数量时，在记录新调用方前先清理空闲调用方
const MAX_TRACKED_IDENTITIES: usize = 10_000;

/// 未携带密钥的调用方共用的限流标识
const ANONYMOUS_IDENTITY: &str = "anonymous";

/// 认证结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// 放行，附带调用方标识（密钥摘要前缀或匿名）
    Allow { identity: String },
    Deny(DenyReason),
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingKey,
    InvalidKey,
    RateLimited,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::MissingKey => "No API key provided",
            DenyReason::InvalidKey => "Invalid API key",
            DenyReason::RateLimited => "Rate limit exceeded",
        }
    }
}

impl From<DenyReason> for ProxyError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::RateLimited => ProxyError::RateLimited,
            other => ProxyError::AuthError(other.as_str().to_string()),
        }
    }
}

type KeyDigest = sha2::digest::Output<Sha256>;

/// 单个密钥的记录
#[derive(Debug, Clone)]
struct KeyRecord {
    digest: KeyDigest,
    description: String,
    created_at: DateTime<Utc>,
    last_used: Option<DateTime<Utc>>,
    usage_count: u64,
    active: bool,
}

/// 对外展示的密钥信息（只含摘要前缀）
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub active: bool,
}

/// 认证统计
#[derive(Debug, Clone, Serialize)]
pub struct AuthStats {
    pub total_api_keys: usize,
    pub active_api_keys: usize,
    pub rate_limit_rpm: u32,
    pub require_api_key: bool,
    pub rate_limited_identities: usize,
    pub keys: Vec<KeyInfo>,
}

// ============================================================================
// 限流器
// ============================================================================

/// 滑动窗口限流器
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// `requests_per_minute = 0` 表示不限流
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一次请求并返回是否放行
    pub fn check_at(&self, identity: &str, now: Instant) -> bool {
        if self.requests_per_minute == 0 {
            return true;
        }
        let mut requests = self.requests.lock();
        if requests.len() >= MAX_TRACKED_IDENTITIES && !requests.contains_key(identity) {
            requests.retain(|_, window| {
                prune(window, now);
                !window.is_empty()
            });
        }
        let window = requests.entry(identity.to_string()).or_default();
        prune(window, now);

        if window.len() < self.requests_per_minute as usize {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn check(&self, identity: &str) -> bool {
        self.check_at(identity, Instant::now())
    }

    /// 当前窗口剩余次数
    pub fn remaining_at(&self, identity: &str, now: Instant) -> u32 {
        if self.requests_per_minute == 0 {
            return u32::MAX;
        }
        let mut requests = self.requests.lock();
        let used = match requests.get_mut(identity) {
            Some(window) => {
                prune(window, now);
                window.len()
            }
            None => 0,
        };
        if used == 0 {
            requests.remove(identity);
        }
        self.requests_per_minute.saturating_sub(used as u32)
    }

    /// 移除窗口内已没有请求的调用方，返回移除数量
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, window| {
            prune(window, now);
            !window.is_empty()
        });
        before - requests.len()
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// 当前跟踪的调用方数量
    pub fn tracked_identities(&self) -> usize {
        self.requests.lock().len()
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= RATE_LIMIT_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

// ============================================================================
// 认证管理器
// ============================================================================

/// 认证管理器
#[derive(Debug)]
pub struct AuthManager {
    require_api_key: bool,
    rate_limit_rpm: u32,
    keys: RwLock<Vec<KeyRecord>>,
    rate_limiter: RateLimiter,
}

impl AuthManager {
    /// 根据配置创建，导入配置中的密钥
    pub fn new(config: &AuthConfig) -> Self {
        let manager = Self {
            require_api_key: config.require_api_key,
            rate_limit_rpm: config.rate_limit_requests_per_minute,
            keys: RwLock::new(Vec::new()),
            rate_limiter: RateLimiter::new(config.rate_limit_requests_per_minute),
        };
        for key in config.allowed_keys.iter().filter(|k| !k.is_empty()) {
            manager.add_key(key, "Configured key");
        }
        tracing::info!(
            "[AUTH] 认证初始化: require_api_key={}, keys={}, rpm={}",
            manager.require_api_key,
            manager.keys.read().len(),
            manager.rate_limit_rpm
        );
        manager
    }

    /// 添加密钥，返回摘要的十六进制表示
    pub fn add_key(&self, api_key: &str, description: &str) -> String {
        let digest = Sha256::digest(api_key.as_bytes());
        let key_hash = format!("{:x}", digest);
        let mut keys = self.keys.write();
        match keys.iter_mut().find(|record| record.digest == digest) {
            Some(record) => record.active = true,
            None => keys.push(KeyRecord {
                digest,
                description: description.to_string(),
                created_at: Utc::now(),
                last_used: None,
                usage_count: 0,
                active: true,
            }),
        }
        tracing::info!("[AUTH] 添加密钥: hash={}...", &key_hash[..8]);
        key_hash
    }

    /// 生成新密钥（`sk-` + 32 字节随机数的 URL-safe base64）
    pub fn create_api_key(&self, description: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let api_key = format!("sk-{}", URL_SAFE_NO_PAD.encode(bytes));
        self.add_key(&api_key, description);
        api_key
    }

    /// 要求密钥但没有任何可用密钥时生成一个
    ///
    /// # 返回
    ///
    /// 新生成的密钥；已有可用密钥或未开启认证时为 `None`
    pub fn ensure_startup_key(&self) -> Option<String> {
        if !self.require_api_key || self.keys.read().iter().any(|r| r.active) {
            return None;
        }
        Some(self.create_api_key("Generated at startup"))
    }

    /// 认证并限流
    pub fn authorize(&self, credential: Option<&str>) -> AuthDecision {
        self.authorize_at(credential, Instant::now())
    }

    pub fn authorize_at(&self, credential: Option<&str>, now: Instant) -> AuthDecision {
        let credential = credential.filter(|c| !c.is_empty());

        let identity = if self.require_api_key {
            let Some(key) = credential else {
                return AuthDecision::Deny(DenyReason::MissingKey);
            };
            match self.match_key(key) {
                Some(digest) => key_id(&digest),
                None => {
                    tracing::warn!("[AUTH] 密钥无效: prefix={}", key_prefix(key));
                    return AuthDecision::Deny(DenyReason::InvalidKey);
                }
            }
        } else {
            credential
                .map(|key| key_id(&Sha256::digest(key.as_bytes())))
                .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string())
        };

        if !self.rate_limiter.check_at(&identity, now) {
            tracing::warn!("[AUTH] 超出限流: identity={}", identity);
            return AuthDecision::Deny(DenyReason::RateLimited);
        }

        AuthDecision::Allow { identity }
    }

    pub fn remaining_requests(&self, identity: &str) -> u32 {
        self.rate_limiter.remaining_at(identity, Instant::now())
    }

    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.keys
            .read()
            .iter()
            .map(|record| KeyInfo {
                key_id: key_id(&record.digest),
                description: record.description.clone(),
                created_at: record.created_at,
                last_used: record.last_used,
                usage_count: record.usage_count,
                active: record.active,
            })
            .collect()
    }

    pub fn stats(&self) -> AuthStats {
        let (total_api_keys, active_api_keys) = {
            let keys = self.keys.read();
            (keys.len(), keys.iter().filter(|r| r.active).count())
        };
        AuthStats {
            total_api_keys,
            active_api_keys,
            rate_limit_rpm: self.rate_limit_rpm,
            require_api_key: self.require_api_key,
            rate_limited_identities: self.rate_limiter.tracked_identities(),
            keys: self.list_keys(),
        }
    }

    /// 清理限流器中的空闲调用方
    pub fn cleanup_rate_limits(&self) -> usize {
        self.rate_limiter.cleanup()
    }

    /// 启动限流器周期清理任务，`shutdown` 取消后退出
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let auth = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("[AUTH] 限流清理任务退出");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = auth.cleanup_rate_limits();
                        if removed > 0 {
                            tracing::debug!("[AUTH] 清理空闲限流记录: {}", removed);
                        }
                    }
                }
            }
        })
    }

    /// 常量时间比对全部活跃密钥，命中时更新使用统计
    fn match_key(&self, api_key: &str) -> Option<KeyDigest> {
        let digest = Sha256::digest(api_key.as_bytes());
        let mut keys = self.keys.write();
        let mut matched: Option<usize> = None;
        for (index, record) in keys.iter().enumerate() {
            let equal: bool = record.digest.as_slice().ct_eq(digest.as_slice()).into();
            if equal && record.active {
                matched = Some(index);
            }
        }
        let record = keys.get_mut(matched?)?;
        record.last_used = Some(Utc::now());
        record.usage_count += 1;
        Some(digest)
    }
}

/// 从请求头提取凭证：优先 `x-api-key`，其次 `Authorization: Bearer`
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(|token| token.trim().to_string())
}

/// 认证中间件
pub async fn require_auth(
    State(auth): State<Arc<AuthManager>>,
    request: Request,
    next: Next,
) -> Response {
    let credential = extract_credential(request.headers());
    match auth.authorize(credential.as_deref()) {
        AuthDecision::Allow { identity } => {
            let mut response = next.run(request).await;
            if auth.rate_limit_rpm > 0 {
                let remaining = auth.remaining_requests(&identity);
                response
                    .headers_mut()
                    .insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
            }
            response
        }
        AuthDecision::Deny(reason) => ProxyError::from(reason).into_response(),
    }
}

/// 限流与展示用的密钥标识（摘要前 16 位）
fn key_id(digest: &KeyDigest) -> String {
    let mut hex = format!("{:x}", digest);
    hex.truncate(16);
    hex
}

fn key_prefix(key: &str) -> String {
    let prefix: String = key.chars().take(6).collect();
    format!("{}...", prefix)
}
