//! DeepSeek 模型特性
//!
//! - `task`: 任务类型识别与采样参数表
//! - `thinking`: 思考模式开关与 `<think>` 推理段拆分
//!
//! [`apply_features`] 把两者组合起来作用于上游请求。

pub mod task;
pub mod thinking;

#[cfg(test)]
mod tests;

pub use task::{detect_task_type, ModelOptimizer, TaskParams, TaskType};
pub use thinking::{
    detect_thinking, match_category, parse_thinking_response, ReasoningSplit, ThinkingCategory,
    ThinkingTrigger,
};

use crate::config::DeepSeekConfig;
use crate::models::openai::ChatCompletionRequest;

/// 思考模式的决定来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingSource {
    /// 调用方显式指定
    Explicit,
    /// 任务参数表要求
    Task,
    /// 配置默认开启
    ConfigDefault,
    /// 自动识别
    Detected(ThinkingTrigger),
    /// 未开启
    Off,
}

/// 优化结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDecision {
    pub task: TaskType,
    pub thinking: bool,
    pub source: ThinkingSource,
}

/// 对上游请求应用任务参数与思考模式
///
/// 显式设置优先；否则依次参考任务参数表、配置默认值和自动识别。
pub fn apply_features(
    request: &mut ChatCompletionRequest,
    explicit_thinking: Option<bool>,
    config: &DeepSeekConfig,
) -> FeatureDecision {
    let task = detect_task_type(request);
    let task_wants_thinking = if config.optimize_parameters {
        ModelOptimizer::new().optimize(request, task)
    } else {
        false
    };

    let (thinking, source) = match explicit_thinking {
        Some(enabled) => (enabled, ThinkingSource::Explicit),
        None if task_wants_thinking => (true, ThinkingSource::Task),
        None if config.default_thinking => (true, ThinkingSource::ConfigDefault),
        None => match detect_thinking(request) {
            Some(trigger) => (true, ThinkingSource::Detected(trigger)),
            None => (false, ThinkingSource::Off),
        },
    };

    if thinking {
        request.enable_thinking();
    } else {
        request.extra_body = None;
    }

    tracing::info!(
        "[DEEPSEEK] 任务类型={}, 思考模式={}, 来源={:?}",
        task,
        thinking,
        source
    );

    FeatureDecision {
        task,
        thinking,
        source,
    }
}
