//! 思考模式
//!
//! - 自动开启判断：四类正则（math / code / reasoning / creative）或工具数 > 2
//! - 响应拆分：`<think>…</think>` 包裹的推理段与最终回答

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::openai::ChatCompletionRequest;

use super::task::COMPLEX_TOOL_THRESHOLD;

/// 推理段起始标记
pub const THINK_OPEN: &str = "<think>";
/// 推理段结束标记
pub const THINK_CLOSE: &str = "</think>";

/// 触发思考模式的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingCategory {
    Math,
    Code,
    Reasoning,
    Creative,
}

/// 有序匹配表
static THINKING_PATTERNS: Lazy<Vec<(ThinkingCategory, Regex)>> = Lazy::new(|| {
    [
        (ThinkingCategory::Math, r"(?i)calculate|solve|equation|formula|math"),
        (ThinkingCategory::Code, r"(?i)code|program|function|algorithm|debug"),
        (ThinkingCategory::Reasoning, r"(?i)analyze|reason|think|logic|deduce"),
        (ThinkingCategory::Creative, r"(?i)create|write|story|poem|creative"),
    ]
    .into_iter()
    .filter_map(|(category, pattern)| match Regex::new(pattern) {
        Ok(regex) => Some((category, regex)),
        Err(e) => {
            tracing::error!("[DEEPSEEK] 思考模式正则无效: {} - {}", pattern, e);
            None
        }
    })
    .collect()
});

/// 返回匹配文本的第一个类别
pub fn match_category(text: &str) -> Option<ThinkingCategory> {
    THINKING_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(text))
        .map(|(category, _)| *category)
}

/// 开启原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingTrigger {
    Pattern(ThinkingCategory),
    ComplexTools,
}

/// 自动判断是否需要思考模式
pub fn detect_thinking(request: &ChatCompletionRequest) -> Option<ThinkingTrigger> {
    if let Some(category) = request
        .messages
        .iter()
        .find_map(|message| match_category(&message.content))
    {
        return Some(ThinkingTrigger::Pattern(category));
    }
    if request.tool_count() > COMPLEX_TOOL_THRESHOLD {
        return Some(ThinkingTrigger::ComplexTools);
    }
    None
}

/// 推理拆分结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningSplit {
    /// `<think>` 与 `</think>` 之间的原文
    pub reasoning: Option<String>,
    /// 推理段之外的原文（前缀 + 后缀）
    pub answer: String,
}

impl ReasoningSplit {
    fn unsplit(content: &str) -> Self {
        Self {
            reasoning: None,
            answer: content.to_string(),
        }
    }

    /// 格式化为单个文本块
    ///
    /// 推理段为空白时只保留回答。
    pub fn to_text(&self) -> String {
        match self.reasoning.as_deref().map(str::trim) {
            Some(reasoning) if !reasoning.is_empty() => format!(
                "**Reasoning Process:**\n{}\n\n**Answer:**\n{}",
                reasoning,
                self.answer.trim()
            ),
            Some(_) => self.answer.trim().to_string(),
            None => self.answer.clone(),
        }
    }
}

/// 拆分响应文本中的推理段
///
/// 只识别第一个完整的 `<think>…</think>`；没有结束标记时整段作为回答。
pub fn parse_thinking_response(content: &str) -> ReasoningSplit {
    let open = match content.find(THINK_OPEN) {
        Some(open) => open,
        None => return ReasoningSplit::unsplit(content),
    };
    let body_start = open + THINK_OPEN.len();
    let close = match content[body_start..].find(THINK_CLOSE) {
        Some(offset) => body_start + offset,
        None => return ReasoningSplit::unsplit(content),
    };

    let reasoning = &content[body_start..close];
    let mut answer = String::with_capacity(content.len() - reasoning.len());
    answer.push_str(&content[..open]);
    answer.push_str(&content[close + THINK_CLOSE.len()..]);

    tracing::debug!(
        "[DEEPSEEK] 提取推理段: reasoning_len={}, answer_len={}",
        reasoning.len(),
        answer.len()
    );

    ReasoningSplit {
        reasoning: Some(reasoning.to_string()),
        answer,
    }
}
