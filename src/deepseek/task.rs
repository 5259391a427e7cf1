//! 任务类型识别与参数优化
//!
//! 根据消息文本把请求归类为 code / reasoning / creative / default，
//! 再按固定参数表覆盖采样参数。纯函数，不依赖外部状态。

use serde::{Deserialize, Serialize};

use crate::models::openai::ChatCompletionRequest;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Code,
    Reasoning,
    Creative,
    /// 只出现在参数表中，不会被自动识别
    Analysis,
    Default,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Code => "code",
            TaskType::Reasoning => "reasoning",
            TaskType::Creative => "creative",
            TaskType::Analysis => "analysis",
            TaskType::Default => "default",
        }
    }

    /// 对应的参数表行
    pub fn params(&self) -> TaskParams {
        match self {
            TaskType::Code => TaskParams {
                temperature: 0.1,
                top_p: 0.9,
                frequency_penalty: 0.2,
                presence_penalty: 0.0,
                thinking: true,
            },
            TaskType::Reasoning => TaskParams {
                temperature: 0.3,
                top_p: 0.8,
                frequency_penalty: 0.1,
                presence_penalty: 0.0,
                thinking: true,
            },
            TaskType::Creative => TaskParams {
                temperature: 0.8,
                top_p: 0.95,
                frequency_penalty: 0.3,
                presence_penalty: 0.2,
                thinking: false,
            },
            TaskType::Analysis => TaskParams {
                temperature: 0.2,
                top_p: 0.85,
                frequency_penalty: 0.1,
                presence_penalty: 0.1,
                thinking: true,
            },
            TaskType::Default => TaskParams {
                temperature: 0.7,
                top_p: 0.8,
                frequency_penalty: 0.1,
                presence_penalty: 0.0,
                thinking: false,
            },
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    /// 是否强制开启思考模式
    pub thinking: bool,
}

/// 关键词表，按优先级排列
const CODE_KEYWORDS: &[&str] = &["code", "function", "class", "implement", "debug", "program"];
const REASONING_KEYWORDS: &[&str] = &["analyze", "reason", "solve", "calculate", "logic"];
const CREATIVE_KEYWORDS: &[&str] = &["write", "create", "story", "poem", "creative"];

/// 工具数量超过该值时视为推理任务
pub const COMPLEX_TOOL_THRESHOLD: usize = 2;

/// 识别任务类型
///
/// 所有消息文本转小写后做子串匹配，优先级：
/// code → reasoning（关键词或工具数 > 2）→ creative → default。
pub fn detect_task_type(request: &ChatCompletionRequest) -> TaskType {
    let text = request
        .messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if contains_any(CODE_KEYWORDS) {
        TaskType::Code
    } else if contains_any(REASONING_KEYWORDS) || request.tool_count() > COMPLEX_TOOL_THRESHOLD {
        TaskType::Reasoning
    } else if contains_any(CREATIVE_KEYWORDS) {
        TaskType::Creative
    } else {
        TaskType::Default
    }
}

/// 参数优化器
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelOptimizer;

impl ModelOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// 按任务类型覆盖采样参数
    ///
    /// # 返回
    ///
    /// 该任务类型是否要求开启思考模式（由调用方结合显式设置决定是否生效）
    pub fn optimize(&self, request: &mut ChatCompletionRequest, task: TaskType) -> bool {
        let params = task.params();
        request.temperature = params.temperature;
        request.top_p = Some(params.top_p);
        request.frequency_penalty = Some(params.frequency_penalty);
        request.presence_penalty = Some(params.presence_penalty);

        tracing::debug!(
            "[DEEPSEEK] 应用任务参数: task={}, temperature={}, thinking={}",
            task,
            params.temperature,
            params.thinking
        );
        params.thinking
    }
}
