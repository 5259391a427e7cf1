//! OpenAI SSE 流解析器
//!
//! 把上游字节流切分为行并解析为 `UpstreamFrame`。
//!
//! # 帧语法
//!
//! - 每行先去除首尾空白，空行不产生帧
//! - 以 `data: ` 开头的行是数据帧；负载为 `[DONE]` 时表示流结束
//! - 其他负载按 JSON 解码为 `ChatCompletionChunk`
//! - 不带前缀的行、解码失败的负载直接丢弃
//!
//! 网络读取的边界与行边界无关，未完成的行保留在缓冲区中，
//! 直到收到换行符或调用 [`OpenAiSseParser::finish`]。
//! 未完成的行超过 [`MAX_LINE_BYTES`] 时整行丢弃，直到下一个换行符。

use crate::models::openai::ChatCompletionChunk;
use tracing::{debug, warn};

/// 数据行前缀
pub const DATA_PREFIX: &str = "data: ";
/// 流结束哨兵
pub const DONE_SENTINEL: &str = "[DONE]";
/// 未完成行的最大长度
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// 上游帧
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    /// 内容帧
    Chunk(ChatCompletionChunk),
    /// 结束哨兵
    Done,
}

/// 解析单行
///
/// # 返回
///
/// 可识别的帧；无法识别的行返回 `None`，不会中断流。
pub fn parse_line(line: &str) -> Option<UpstreamFrame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let payload = match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => payload,
        None => {
            debug!("[STREAM] 忽略非数据行: {}", line);
            return None;
        }
    };

    if payload == DONE_SENTINEL {
        return Some(UpstreamFrame::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => Some(UpstreamFrame::Chunk(chunk)),
        Err(e) => {
            warn!("[STREAM] 解析上游帧失败: {} - data: {}", e, payload);
            None
        }
    }
}

/// OpenAI SSE 增量解析器
#[derive(Debug, Default)]
pub struct OpenAiSseParser {
    /// 尚未遇到换行符的字节
    buffer: Vec<u8>,
    /// 已产生的帧数量
    frames_parsed: u64,
    /// 已丢弃的行数量
    lines_dropped: u64,
    /// 正在跳过超长行的剩余部分
    skipping_oversized: bool,
}

impl OpenAiSseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一段字节，返回其中完整行解析出的帧
    pub fn process(&mut self, bytes: &[u8]) -> Vec<UpstreamFrame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        // 缓冲区中的旧字节不含换行符，只需扫描新字节
        let mut cursor = buffer.len();
        buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = buffer[cursor..].iter().position(|b| *b == b'\n') {
            let line_end = cursor + offset;
            if self.skipping_oversized {
                self.skipping_oversized = false;
            } else if let Some(frame) = self.parse_bytes_line(&buffer[line_start..=line_end]) {
                frames.push(frame);
            }
            line_start = line_end + 1;
            cursor = line_start;
        }
        buffer.drain(..line_start);

        if self.skipping_oversized {
            buffer.clear();
        } else if buffer.len() > MAX_LINE_BYTES {
            warn!("[STREAM] 上游行超过 {} 字节，已丢弃", MAX_LINE_BYTES);
            self.lines_dropped += 1;
            self.skipping_oversized = true;
            buffer.clear();
        }
        self.buffer = buffer;
        frames
    }

    /// 上游结束时处理缓冲区中剩余的不完整行
    pub fn finish(&mut self) -> Vec<UpstreamFrame> {
        let line = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.skipping_oversized) || line.is_empty() {
            return Vec::new();
        }
        self.parse_bytes_line(&line).into_iter().collect()
    }

    fn parse_bytes_line(&mut self, line: &[u8]) -> Option<UpstreamFrame> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(e) => {
                warn!("[STREAM] 上游行不是合法 UTF-8，已丢弃: {}", e);
                self.lines_dropped += 1;
                return None;
            }
        };

        if text.trim().is_empty() {
            return None;
        }

        match parse_line(text) {
            Some(frame) => {
                self.frames_parsed += 1;
                Some(frame)
            }
            None => {
                self.lines_dropped += 1;
                None
            }
        }
    }

    /// 已解析的帧数量
    pub fn frames_parsed(&self) -> u64 {
        self.frames_parsed
    }

    /// 已丢弃的行数量
    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// 缓冲区中是否还有未完成的行
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }
}
