//! 响应缓存
//!
//! 仅缓存非流式、无工具的请求。键为上游请求的 SHA-256 摘要，
//! 值为转换后的 Anthropic 响应。内存 LRU（`IndexMap` 保持访问顺序），
//! 每个条目按请求类型设置 TTL，后台任务定期清理过期条目。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::models::anthropic::AnthropicMessagesResponse;
use crate::models::openai::ChatCompletionRequest;

/// 缓存键前缀
pub const CACHE_KEY_PREFIX: &str = "claude_proxy:";

const CODE_KEYWORDS: &[&str] = &["function", "class", "code", "implement"];
const REASONING_KEYWORDS: &[&str] = &["analyze", "reason", "solve", "calculate"];
const STATIC_INFO_KEYWORDS: &[&str] = &["what is", "define", "explain"];

/// 决定 TTL 的请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    CodeGeneration,
    Reasoning,
    StaticInfo,
    Default,
}

impl RequestType {
    /// 按非 system 消息文本识别
    pub fn detect(request: &ChatCompletionRequest) -> Self {
        let text = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| m.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

        if contains_any(CODE_KEYWORDS) {
            RequestType::CodeGeneration
        } else if contains_any(REASONING_KEYWORDS) {
            RequestType::Reasoning
        } else if contains_any(STATIC_INFO_KEYWORDS) {
            RequestType::StaticInfo
        } else {
            RequestType::Default
        }
    }

    pub fn ttl(&self, default_ttl: Duration) -> Duration {
        match self {
            RequestType::CodeGeneration => Duration::from_secs(3600),
            RequestType::Reasoning => Duration::from_secs(1800),
            RequestType::StaticInfo => Duration::from_secs(86400),
            RequestType::Default => default_ttl,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: AnthropicMessagesResponse,
    expires_at: Instant,
}

/// 缓存统计
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_entries: usize,
    pub valid_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// 响应缓存
#[derive(Debug)]
pub struct ResponseCache {
    enabled: bool,
    max_entries: usize,
    default_ttl: Duration,
    entries: Mutex<IndexMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled && config.max_entries > 0,
            max_entries: config.max_entries,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            entries: Mutex::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 是否可以缓存该请求
    pub fn should_cache(&self, request: &ChatCompletionRequest) -> bool {
        self.enabled && !request.stream && request.tool_count() == 0
    }

    /// 生成缓存键
    ///
    /// 对上游请求（去掉 stream 标记）的 JSON 做摘要；请求结构字段顺序固定。
    pub fn cache_key(request: &ChatCompletionRequest) -> String {
        let mut normalized = request.clone();
        normalized.stream = false;
        let serialized = serde_json::to_vec(&normalized).unwrap_or_default();
        format!("{}{:x}", CACHE_KEY_PREFIX, Sha256::digest(&serialized))
    }

    pub fn get(&self, key: &str) -> Option<AnthropicMessagesResponse> {
        self.get_at(key, Instant::now())
    }

    /// 查询并刷新 LRU 顺序；过期条目视为未命中并移除
    pub fn get_at(&self, key: &str, now: Instant) -> Option<AnthropicMessagesResponse> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        let hit = match entries.shift_remove(key) {
            Some(entry) if entry.expires_at > now => {
                let value = entry.value.clone();
                entries.insert(key.to_string(), entry);
                Some(value)
            }
            _ => None,
        };
        drop(entries);

        match &hit {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[CACHE] 命中: key={}...", short_key(key));
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[CACHE] 未命中: key={}...", short_key(key));
            }
        }
        hit
    }

    /// 按请求类型决定 TTL 后写入
    pub fn store(&self, key: String, request: &ChatCompletionRequest, value: AnthropicMessagesResponse) {
        if !self.should_cache(request) {
            return;
        }
        let request_type = RequestType::detect(request);
        let ttl = request_type.ttl(self.default_ttl);
        self.insert_at(key.clone(), value, ttl, Instant::now());
        tracing::debug!(
            "[CACHE] 写入: key={}..., type={:?}, ttl={}s",
            short_key(&key),
            request_type,
            ttl.as_secs()
        );
    }

    /// 写入条目，超出容量时淘汰最久未使用的条目
    pub fn insert_at(
        &self,
        key: String,
        value: AnthropicMessagesResponse,
        ttl: Duration,
        now: Instant,
    ) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        while entries.len() >= self.max_entries {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().shift_remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        tracing::info!("[CACHE] 已清空");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 清理过期条目，返回清理数量
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            enabled: self.enabled,
            size: entries.len(),
            max_entries: self.max_entries,
            valid_entries: entries.values().filter(|e| e.expires_at > now).count(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// 启动周期清理任务，`shutdown` 取消后退出
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("[CACHE] 清理任务退出");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = cache.cleanup_expired();
                        if removed > 0 {
                            tracing::debug!("[CACHE] 清理过期条目: {}", removed);
                        }
                    }
                }
            }
        })
    }
}

fn short_key(key: &str) -> &str {
    let start = CACHE_KEY_PREFIX.len().min(key.len());
    let end = (start + 12).min(key.len());
    key.get(start..end).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::anthropic::{AnthropicUsage, ResponseContentBlock};
    use crate::models::openai::ChatMessage;

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_entries,
            default_ttl_secs: 60,
            cleanup_interval_secs: 1,
        }
    }

    fn request(text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "deepseek-v3.1".to_string(),
            messages: vec![ChatMessage::new("user", text.to_string())],
            max_tokens: 100,
            temperature: 0.7,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: false,
            tools: None,
            tool_choice: None,
            stop: None,
            extra_body: None,
        }
    }

    fn response(text: &str) -> AnthropicMessagesResponse {
        AnthropicMessagesResponse {
            id: "msg_1".to_string(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            model: "deepseek-v3.1".to_string(),
            content: vec![ResponseContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: "end_turn".to_string(),
            stop_sequence: None,
            usage: AnthropicUsage::default(),
        }
    }

    #[test]
    fn test_key_is_stable_and_ignores_stream_flag() {
        let a = request("hello");
        let mut b = request("hello");
        b.stream = true;
        assert_eq!(ResponseCache::cache_key(&a), ResponseCache::cache_key(&b));
        assert_ne!(
            ResponseCache::cache_key(&a),
            ResponseCache::cache_key(&request("hello!"))
        );
        assert!(ResponseCache::cache_key(&a).starts_with(CACHE_KEY_PREFIX));
        let hex = &ResponseCache::cache_key(&a)[CACHE_KEY_PREFIX.len()..];
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_should_cache() {
        let cache = ResponseCache::new(&config(10));
        assert!(cache.should_cache(&request("hi")));

        let mut streaming = request("hi");
        streaming.stream = true;
        assert!(!cache.should_cache(&streaming));

        let disabled = ResponseCache::new(&CacheConfig {
            enabled: false,
            ..config(10)
        });
        assert!(!disabled.should_cache(&request("hi")));
    }

    #[test]
    fn test_request_type_ttl() {
        let default_ttl = Duration::from_secs(60);
        let code = RequestType::detect(&request("implement a parser"));
        assert_eq!(code, RequestType::CodeGeneration);
        assert_eq!(code.ttl(default_ttl), Duration::from_secs(3600));

        let reasoning = RequestType::detect(&request("solve it"));
        assert_eq!(reasoning.ttl(default_ttl), Duration::from_secs(1800));

        let info = RequestType::detect(&request("What is Rust?"));
        assert_eq!(info, RequestType::StaticInfo);
        assert_eq!(info.ttl(default_ttl), Duration::from_secs(86400));

        assert_eq!(RequestType::detect(&request("hi")).ttl(default_ttl), default_ttl);
    }

    #[test]
    fn test_store_and_hit() {
        let cache = ResponseCache::new(&config(10));
        let req = request("hi");
        let key = ResponseCache::cache_key(&req);

        assert!(cache.get(&key).is_none());
        cache.store(key.clone(), &req, response("cached"));
        assert_eq!(cache.get(&key), Some(response("cached")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.valid_entries, 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = ResponseCache::new(&config(10));
        let now = Instant::now();
        cache.insert_at("k".to_string(), response("x"), Duration::from_secs(5), now);

        assert!(cache.get_at("k", now + Duration::from_secs(1)).is_some());
        assert!(cache.get_at("k", now + Duration::from_secs(6)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(&config(2));
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        cache.insert_at("a".to_string(), response("a"), ttl, now);
        cache.insert_at("b".to_string(), response("b"), ttl, now);
        // 访问 a 后 b 成为最久未使用
        assert!(cache.get_at("a", now).is_some());
        cache.insert_at("c".to_string(), response("c"), ttl, now);

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("b", now).is_none());
        assert!(cache.get_at("a", now).is_some());
        assert!(cache.get_at("c", now).is_some());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = ResponseCache::new(&config(10));
        let now = Instant::now();
        cache.insert_at("short".to_string(), response("s"), Duration::from_secs(1), now);
        cache.insert_at("long".to_string(), response("l"), Duration::from_secs(100), now);

        assert_eq!(cache.cleanup_expired_at(now + Duration::from_secs(2)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let cache = Arc::new(ResponseCache::new(&config(10)));
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_cleanup(Duration::from_millis(10), shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
