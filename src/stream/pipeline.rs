//! 流处理管道
//!
//! 封装完整的流式处理流程：上游字节流 → 行解析 → 状态机 → 下游 SSE
//!
//! # 使用示例
//!
//! ```ignore
//! use claude_deepseek_proxy::stream::pipeline::{create_sse_stream, PipelineConfig};
//!
//! let handle = registry.admit(stream_id.clone()).await?;
//! let config = PipelineConfig::new(stream_id, "deepseek-v3.1".to_string());
//! let sse_stream = create_sse_stream(byte_stream, config, handle);
//! ```

use std::fmt::Display;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::stream::generators::AnthropicSseGenerator;
use crate::stream::parsers::{OpenAiSseParser, UpstreamFrame};
use crate::stream::registry::StreamHandle;
use crate::stream::translator::StreamTranslator;

/// 流处理管道配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 流 ID（下游消息 ID）
    pub stream_id: String,
    /// 下游显示的模型名称
    pub model: String,
}

impl PipelineConfig {
    pub fn new(stream_id: String, model: String) -> Self {
        Self { stream_id, model }
    }
}

/// 同步流处理管道
///
/// 不做任何 I/O，便于直接测试；异步驱动见 [`create_sse_stream`]。
#[derive(Debug)]
pub struct StreamPipeline {
    parser: OpenAiSseParser,
    translator: StreamTranslator,
    generator: AnthropicSseGenerator,
    /// 是否已收到 `[DONE]`
    upstream_done: bool,
}

impl StreamPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            parser: OpenAiSseParser::new(),
            translator: StreamTranslator::new(config.stream_id, config.model),
            generator: AnthropicSseGenerator::new(),
            upstream_done: false,
        }
    }

    /// 开始：在读取上游之前输出 `message_start` 与文本块开始事件
    pub fn start(&mut self) -> Vec<String> {
        let events = self.translator.start();
        self.generator.generate(&events)
    }

    /// 处理一段上游字节
    ///
    /// # 返回
    ///
    /// 生成的 SSE 字符串列表；收到 `[DONE]` 后的数据被忽略。
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<String> {
        if self.upstream_done {
            return Vec::new();
        }
        let frames = self.parser.process(bytes);
        self.handle_frames(frames)
    }

    /// 上游正常结束：处理剩余缓冲并输出关闭序列
    pub fn finish(&mut self) -> Vec<String> {
        let mut sse = Vec::new();
        if !self.upstream_done {
            let frames = self.parser.finish();
            sse.extend(self.handle_frames(frames));
        }
        let events = self.translator.finish();
        sse.extend(self.generator.generate(&events));
        sse
    }

    /// 不可恢复错误：输出通用错误事件与关闭序列
    pub fn fail(&mut self) -> Vec<String> {
        let events = self.translator.fail();
        self.generator.generate(&events)
    }

    fn handle_frames(&mut self, frames: Vec<UpstreamFrame>) -> Vec<String> {
        let mut sse = Vec::new();
        for frame in frames {
            match frame {
                UpstreamFrame::Chunk(chunk) => {
                    let events = self.translator.process_chunk(&chunk);
                    sse.extend(self.generator.generate(&events));
                }
                UpstreamFrame::Done => {
                    self.upstream_done = true;
                    break;
                }
            }
        }
        sse
    }

    /// 是否已收到 `[DONE]`
    pub fn is_upstream_done(&self) -> bool {
        self.upstream_done
    }

    /// 已处理的上游帧数量
    pub fn frames_processed(&self) -> u64 {
        self.translator.state().chunks_processed
    }

    /// 已输出的下游事件数量
    pub fn events_emitted(&self) -> u64 {
        self.generator.events_emitted()
    }

    /// 已丢弃的上游行数量
    pub fn lines_dropped(&self) -> u64 {
        self.parser.lines_dropped()
    }

    pub fn translator(&self) -> &StreamTranslator {
        &self.translator
    }
}

/// 拉取循环的下一步
enum Next<T> {
    Item(T),
    End,
    Cancelled,
}

/// 创建流式处理的异步流
///
/// 将上游字节流转换为下游 SSE 字符串流。
///
/// - 开始事件在等待上游之前输出
/// - 上游传输错误或注册表回收时走错误路径，仍输出关闭序列
/// - 客户端断开时整个流被 drop，上游连接与槽位随之释放
pub fn create_sse_stream<S, E>(
    byte_stream: S,
    config: PipelineConfig,
    handle: StreamHandle,
) -> impl Stream<Item = Result<String, std::convert::Infallible>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut handle = handle;
        let cancel = handle.cancellation_token();
        let started = Instant::now();
        let stream_id = config.stream_id.clone();
        let mut pipeline = StreamPipeline::new(config);
        let mut byte_stream = std::pin::pin!(byte_stream);
        let mut failed = false;

        for sse in pipeline.start() {
            yield Ok(sse);
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Cancelled,
                item = byte_stream.next() => match item {
                    Some(item) => Next::Item(item),
                    None => Next::End,
                },
            };

            match next {
                Next::Item(Ok(bytes)) => {
                    let before = pipeline.frames_processed();
                    let sse_strings = pipeline.process_chunk(&bytes);
                    handle.record_frames(pipeline.frames_processed() - before);
                    for sse in sse_strings {
                        yield Ok(sse);
                    }
                    if pipeline.is_upstream_done() {
                        break;
                    }
                }
                Next::Item(Err(e)) => {
                    tracing::error!("[STREAM] 上游传输错误: stream_id={}, error={}", stream_id, e);
                    failed = true;
                    break;
                }
                Next::End => break,
                Next::Cancelled => {
                    tracing::warn!("[STREAM] 流已被注册表回收: stream_id={}", stream_id);
                    failed = true;
                    break;
                }
            }
        }

        let closing = if failed { pipeline.fail() } else { pipeline.finish() };
        for sse in closing {
            yield Ok(sse);
        }

        handle.release();
        tracing::info!(
            "[STREAM] 流结束: stream_id={}, frames={}, events={}, dropped_lines={}, failed={}, elapsed={}ms",
            stream_id,
            pipeline.frames_processed(),
            pipeline.events_emitted(),
            pipeline.lines_dropped(),
            failed,
            started.elapsed().as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> StreamPipeline {
        StreamPipeline::new(PipelineConfig::new(
            "msg_pipe".to_string(),
            "deepseek-v3.1".to_string(),
        ))
    }

    #[test]
    fn test_pipeline_process_content() {
        let mut pipeline = pipeline();
        let start = pipeline.start();
        assert_eq!(start.len(), 2);
        assert!(start[0].contains("message_start"));
        assert!(start[1].contains("content_block_start"));

        let sse = pipeline.process_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n");
        assert_eq!(sse.len(), 1);
        assert!(sse[0].contains("text_delta"));
        assert!(sse[0].contains("Hello"));
    }

    #[test]
    fn test_pipeline_ignores_data_after_done() {
        let mut pipeline = pipeline();
        pipeline.start();
        let sse = pipeline.process_chunk(
            b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        );
        assert!(sse.is_empty());
        assert!(pipeline.is_upstream_done());
        assert!(pipeline.process_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n").is_empty());

        let closing = pipeline.finish();
        assert_eq!(closing.len(), 2);
        assert!(closing[0].contains("content_block_stop"));
        assert!(closing[1].contains("message_stop"));
    }

    #[test]
    fn test_pipeline_finish_flushes_unterminated_line() {
        let mut pipeline = pipeline();
        pipeline.start();
        assert!(pipeline
            .process_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}")
            .is_empty());
        let closing = pipeline.finish();
        assert_eq!(closing.len(), 3);
        assert!(closing[0].contains("tail"));
    }

    #[test]
    fn test_pipeline_fail_sequence() {
        let mut pipeline = pipeline();
        pipeline.start();
        let closing = pipeline.fail();
        assert_eq!(closing.len(), 3);
        assert!(closing[0].contains("\"type\":\"error\""));
        assert!(closing[0].contains("Streaming error occurred"));
        assert!(pipeline.finish().is_empty());
    }
}
