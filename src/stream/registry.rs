//! 流会话注册表
//!
//! 限制同时进行的流式转换数量，记录每个流的生命周期元数据，
//! 并定期回收长时间未结束的流。
//!
//! - 准入：`Semaphore` 许可证，等待空闲槽位，超过准入等待时间才返回 `Busy`
//! - 释放：`StreamHandle` 在 drop 或显式 `release()` 时归还槽位，重复释放无效果
//! - 回收：`sweep_stale` 移除超龄会话、归还槽位并取消对应流
//!
//! 回收只是泄漏兜底，不是请求超时。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamingConfig;

/// 注册表错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// 并发流数量已达上限
    #[error("too many concurrent streams (max {max})")]
    Busy { max: usize },
    /// 注册表已关闭
    #[error("stream registry is closed")]
    Closed,
    /// 流 ID 已在使用
    #[error("stream id already registered: {0}")]
    Duplicate(String),
}

/// 注册表配置
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 最大并发流数量
    pub max_concurrent_streams: usize,
    /// 准入等待时间
    pub admission_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 10,
            admission_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&StreamingConfig> for RegistryConfig {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            max_concurrent_streams: config.max_concurrent_streams,
            admission_timeout: Duration::from_secs(config.admission_timeout_secs),
        }
    }
}

/// 单个会话的元数据
#[derive(Debug)]
struct SessionEntry {
    /// 会话序号，区分同一 ID 的先后两次注册
    session: u64,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    frames: Arc<AtomicU64>,
    cancel: CancellationToken,
    /// 槽位许可证，随条目移除而释放
    _permit: OwnedSemaphorePermit,
}

impl SessionEntry {
    fn snapshot(&self, stream_id: &str) -> StreamSnapshot {
        StreamSnapshot {
            stream_id: stream_id.to_string(),
            started_at: self.started_at_utc,
            age_secs: self.started_at.elapsed().as_secs_f64(),
            frames_processed: self.frames.load(Ordering::Relaxed),
        }
    }
}

/// 会话快照
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub stream_id: String,
    pub started_at: DateTime<Utc>,
    pub age_secs: f64,
    pub frames_processed: u64,
}

/// 注册表统计
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub max_concurrent_streams: usize,
    pub active_streams: usize,
    pub available_slots: usize,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub total_evicted: u64,
}

#[derive(Debug)]
struct RegistryInner {
    config: RegistryConfig,
    semaphore: Arc<Semaphore>,
    sessions: DashMap<String, SessionEntry>,
    next_session: AtomicU64,
    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
    total_evicted: AtomicU64,
}

impl RegistryInner {
    /// 仅当条目仍属于该会话时移除
    fn remove_session(&self, stream_id: &str, session: u64) -> bool {
        self.sessions
            .remove_if(stream_id, |_, entry| entry.session == session)
            .is_some()
    }
}

/// 流会话注册表
///
/// 克隆开销很小，所有克隆共享同一张槽位表。
#[derive(Debug, Clone)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

impl StreamRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let permits = config.max_concurrent_streams;
        Self {
            inner: Arc::new(RegistryInner {
                semaphore: Arc::new(Semaphore::new(permits)),
                config,
                sessions: DashMap::new(),
                next_session: AtomicU64::new(1),
                total_admitted: AtomicU64::new(0),
                total_rejected: AtomicU64::new(0),
                total_evicted: AtomicU64::new(0),
            }),
        }
    }

    /// 使用最大并发数创建（准入等待时间取默认值）
    pub fn with_capacity(max_concurrent_streams: usize) -> Self {
        Self::new(RegistryConfig {
            max_concurrent_streams,
            ..RegistryConfig::default()
        })
    }

    /// 申请一个流槽位
    ///
    /// 没有空闲槽位时等待；等待超过准入时间后返回 `RegistryError::Busy`。
    pub async fn admit(&self, stream_id: impl Into<String>) -> Result<StreamHandle, RegistryError> {
        let stream_id = stream_id.into();
        let acquire = self.inner.semaphore.clone().acquire_owned();

        let permit = match tokio::time::timeout(self.inner.config.admission_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(RegistryError::Closed),
            Err(_) => {
                self.inner.total_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[REGISTRY] 等待流槽位超时: stream_id={}, max={}",
                    stream_id,
                    self.inner.config.max_concurrent_streams
                );
                return Err(RegistryError::Busy {
                    max: self.inner.config.max_concurrent_streams,
                });
            }
        };

        self.register(stream_id, permit)
    }

    /// 非等待版本：没有空闲槽位时立即返回 `Busy`
    pub fn try_admit(&self, stream_id: impl Into<String>) -> Result<StreamHandle, RegistryError> {
        let stream_id = stream_id.into();
        let permit = match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                self.inner.total_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RegistryError::Busy {
                    max: self.inner.config.max_concurrent_streams,
                });
            }
            Err(TryAcquireError::Closed) => return Err(RegistryError::Closed),
        };

        self.register(stream_id, permit)
    }

    fn register(
        &self,
        stream_id: String,
        permit: OwnedSemaphorePermit,
    ) -> Result<StreamHandle, RegistryError> {
        let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let frames = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        match self.inner.sessions.entry(stream_id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::Duplicate(stream_id)),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    session,
                    started_at: Instant::now(),
                    started_at_utc: Utc::now(),
                    frames: frames.clone(),
                    cancel: cancel.clone(),
                    _permit: permit,
                });
            }
        }

        self.inner.total_admitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "[REGISTRY] 流已准入: stream_id={}, active={}",
            stream_id,
            self.inner.sessions.len()
        );

        Ok(StreamHandle {
            stream_id,
            session,
            frames,
            cancel,
            inner: self.inner.clone(),
            released: false,
        })
    }

    /// 当前活跃流数量
    pub fn active_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// 空闲槽位数量
    pub fn available_slots(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.inner.config.max_concurrent_streams
    }

    /// 单个流的快照
    pub fn snapshot(&self, stream_id: &str) -> Option<StreamSnapshot> {
        self.inner
            .sessions
            .get(stream_id)
            .map(|entry| entry.snapshot(stream_id))
    }

    /// 所有活跃流的快照，按开始时间排序
    pub fn active_streams(&self) -> Vec<StreamSnapshot> {
        let mut snapshots: Vec<StreamSnapshot> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            max_concurrent_streams: self.inner.config.max_concurrent_streams,
            active_streams: self.active_count(),
            available_slots: self.available_slots(),
            total_admitted: self.inner.total_admitted.load(Ordering::Relaxed),
            total_rejected: self.inner.total_rejected.load(Ordering::Relaxed),
            total_evicted: self.inner.total_evicted.load(Ordering::Relaxed),
        }
    }

    /// 回收超龄会话
    ///
    /// # 返回
    ///
    /// 被回收的流 ID 列表
    pub fn sweep_stale(&self, max_age: Duration) -> Vec<String> {
        let stale: Vec<(String, u64)> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().started_at.elapsed() > max_age)
            .map(|entry| (entry.key().clone(), entry.value().session))
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for (stream_id, session) in stale {
            let removed = self
                .inner
                .sessions
                .remove_if(&stream_id, |_, entry| entry.session == session);
            if let Some((_, entry)) = removed {
                entry.cancel.cancel();
                self.inner.total_evicted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[REGISTRY] 回收超龄流: stream_id={}, age={:.1}s, frames={}",
                    stream_id,
                    entry.started_at.elapsed().as_secs_f64(),
                    entry.frames.load(Ordering::Relaxed)
                );
                evicted.push(stream_id);
            }
        }
        evicted
    }

    /// 启动后台回收任务
    ///
    /// # 参数
    /// - `interval`: 回收周期
    /// - `max_age`: 超龄阈值
    /// - `shutdown`: 取消后任务退出
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        max_age: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("[REGISTRY] 回收任务已停止");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.sweep_stale(max_age);
                        if !evicted.is_empty() {
                            tracing::info!("[REGISTRY] 本轮回收 {} 个流", evicted.len());
                        }
                    }
                }
            }
        })
    }

    /// 关闭注册表：拒绝新的准入并取消所有活跃流
    pub fn close(&self) {
        self.inner.semaphore.close();
        for entry in self.inner.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }
}

/// 流槽位句柄
///
/// 持有期间槽位被占用；drop 或 `release()` 时归还。
#[derive(Debug)]
pub struct StreamHandle {
    stream_id: String,
    session: u64,
    frames: Arc<AtomicU64>,
    cancel: CancellationToken,
    inner: Arc<RegistryInner>,
    released: bool,
}

impl StreamHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// 记录已处理的上游帧
    pub fn record_frames(&self, count: u64) {
        self.frames.fetch_add(count, Ordering::Relaxed);
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// 被回收或注册表关闭时触发的取消令牌
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// 归还槽位
    ///
    /// # 返回
    ///
    /// 本次调用是否真正释放了槽位（重复释放或已被回收时为 `false`）
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let removed = self.inner.remove_session(&self.stream_id, self.session);
        if removed {
            tracing::debug!(
                "[REGISTRY] 流已释放: stream_id={}, frames={}",
                self.stream_id,
                self.frames_processed()
            );
        }
        removed
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if self.inner.remove_session(&self.stream_id, self.session) {
                tracing::debug!(
                    "[REGISTRY] 流句柄被丢弃，槽位已归还: stream_id={}",
                    self.stream_id
                );
            }
        }
    }
}
