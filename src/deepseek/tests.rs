//! DeepSeek 特性测试

use proptest::prelude::*;

use super::*;
use crate::config::DeepSeekConfig;
use crate::models::openai::{ChatCompletionRequest, ChatMessage, FunctionDefinition, OpenAiTool};

fn request(texts: &[&str], tools: usize) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: "deepseek-v3.1".to_string(),
        messages: texts
            .iter()
            .map(|t| ChatMessage::new("user", t.to_string()))
            .collect(),
        max_tokens: 4096,
        temperature: 0.7,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        stream: false,
        tools: if tools == 0 {
            None
        } else {
            Some(
                (0..tools)
                    .map(|i| OpenAiTool {
                        tool_type: "function".to_string(),
                        function: FunctionDefinition {
                            name: format!("tool_{}", i),
                            description: String::new(),
                            parameters: serde_json::json!({"type": "object"}),
                        },
                    })
                    .collect(),
            )
        },
        tool_choice: None,
        stop: None,
        extra_body: None,
    }
}

// ============================================================================
// 任务类型
// ============================================================================

#[test]
fn test_detect_each_task_type() {
    assert_eq!(detect_task_type(&request(&["Please debug this"], 0)), TaskType::Code);
    assert_eq!(detect_task_type(&request(&["Solve x + 1 = 2"], 0)), TaskType::Reasoning);
    assert_eq!(detect_task_type(&request(&["Write me a poem"], 0)), TaskType::Creative);
    assert_eq!(detect_task_type(&request(&["Hello there"], 0)), TaskType::Default);
}

#[test]
fn test_detect_is_case_insensitive_and_spans_messages() {
    let req = request(&["first message", "now ANALYZE the data"], 0);
    assert_eq!(detect_task_type(&req), TaskType::Reasoning);
}

#[test]
fn test_code_has_priority_over_reasoning_and_creative() {
    let req = request(&["write a story, then analyze and implement it"], 0);
    assert_eq!(detect_task_type(&req), TaskType::Code);
}

#[test]
fn test_many_tools_means_reasoning() {
    assert_eq!(detect_task_type(&request(&["hi"], 3)), TaskType::Reasoning);
    assert_eq!(detect_task_type(&request(&["hi"], 2)), TaskType::Default);
    // 工具数量不会压过 code 关键词
    assert_eq!(
        detect_task_type(&request(&["implement a function"], 3)),
        TaskType::Code
    );
}

#[test]
fn test_analysis_is_never_detected() {
    for text in ["analysis", "analytic review", "evaluate the analysis"] {
        assert_ne!(detect_task_type(&request(&[text], 0)), TaskType::Analysis);
    }
}

#[test]
fn test_parameter_table() {
    let code = TaskType::Code.params();
    assert_eq!((code.temperature, code.top_p, code.frequency_penalty, code.presence_penalty), (0.1, 0.9, 0.2, 0.0));
    assert!(code.thinking);

    let reasoning = TaskType::Reasoning.params();
    assert_eq!((reasoning.temperature, reasoning.top_p), (0.3, 0.8));
    assert!(reasoning.thinking);

    let creative = TaskType::Creative.params();
    assert_eq!((creative.temperature, creative.top_p, creative.presence_penalty), (0.8, 0.95, 0.2));
    assert!(!creative.thinking);

    let analysis = TaskType::Analysis.params();
    assert_eq!((analysis.temperature, analysis.top_p, analysis.presence_penalty), (0.2, 0.85, 0.1));
    assert!(analysis.thinking);

    let default = TaskType::Default.params();
    assert_eq!((default.temperature, default.top_p, default.frequency_penalty), (0.7, 0.8, 0.1));
    assert!(!default.thinking);
}

#[test]
fn test_optimizer_writes_parameters() {
    let mut req = request(&["tell me a story"], 0);
    let wants_thinking = ModelOptimizer::new().optimize(&mut req, TaskType::Creative);
    assert!(!wants_thinking);
    assert_eq!(req.temperature, 0.8);
    assert_eq!(req.top_p, Some(0.95));
    assert_eq!(req.frequency_penalty, Some(0.3));
    assert_eq!(req.presence_penalty, Some(0.2));
}

// ============================================================================
// 思考模式
// ============================================================================

#[test]
fn test_each_thinking_category() {
    assert_eq!(match_category("What is the FORMULA"), Some(ThinkingCategory::Math));
    assert_eq!(match_category("an algorithm question"), Some(ThinkingCategory::Code));
    assert_eq!(match_category("let me think"), Some(ThinkingCategory::Reasoning));
    assert_eq!(match_category("a short story"), Some(ThinkingCategory::Creative));
    assert_eq!(match_category("good morning"), None);
}

#[test]
fn test_thinking_table_order() {
    // 同时命中多个类别时返回表中第一个
    assert_eq!(match_category("solve this code"), Some(ThinkingCategory::Math));
}

#[test]
fn test_detect_thinking_by_tools() {
    assert_eq!(
        detect_thinking(&request(&["hello"], 3)),
        Some(ThinkingTrigger::ComplexTools)
    );
    assert_eq!(detect_thinking(&request(&["hello"], 2)), None);
}

#[test]
fn test_parse_thinking_found() {
    let split = parse_thinking_response("<think>step 1\nstep 2</think>\n\nThe answer is 4.");
    assert_eq!(split.reasoning.as_deref(), Some("step 1\nstep 2"));
    assert_eq!(split.answer, "\n\nThe answer is 4.");
    assert_eq!(
        split.to_text(),
        "**Reasoning Process:**\nstep 1\nstep 2\n\n**Answer:**\nThe answer is 4."
    );
}

#[test]
fn test_parse_thinking_not_found() {
    let split = parse_thinking_response("plain answer");
    assert_eq!(split.reasoning, None);
    assert_eq!(split.to_text(), "plain answer");

    let unclosed = parse_thinking_response("<think>never closed");
    assert_eq!(unclosed.reasoning, None);
    assert_eq!(unclosed.answer, "<think>never closed");
}

#[test]
fn test_parse_thinking_keeps_prefix() {
    let split = parse_thinking_response("Note: <think>why</think> done");
    assert_eq!(split.reasoning.as_deref(), Some("why"));
    assert_eq!(split.answer, "Note:  done");
}

#[test]
fn test_empty_reasoning_formats_as_answer() {
    let split = parse_thinking_response("<think>  </think> 42 ");
    assert_eq!(split.to_text(), "42");
}

proptest! {
    /// 拆分不丢字符：推理段 + 回答 = 原文去掉标记
    #[test]
    fn prop_reasoning_split_round_trip(
        prefix in "[a-zA-Z0-9 \n.]{0,20}",
        reasoning in "[a-zA-Z0-9 \n.<>/]{0,40}",
        suffix in "[a-zA-Z0-9 \n.<>]{0,40}"
    ) {
        prop_assume!(!prefix.contains("<think>"));
        prop_assume!(!reasoning.contains("</think>"));

        let content = format!("{}<think>{}</think>{}", prefix, reasoning, suffix);
        let split = parse_thinking_response(&content);

        prop_assert_eq!(split.reasoning.as_deref(), Some(reasoning.as_str()));
        prop_assert_eq!(split.answer.clone(), format!("{}{}", prefix, suffix));
        prop_assert_eq!(
            split.reasoning.as_ref().map(|r| r.len()).unwrap_or(0) + split.answer.len(),
            content.len() - "<think>".len() - "</think>".len()
        );
    }

    /// 不含标记的文本原样返回
    #[test]
    fn prop_text_without_tags_is_untouched(text in "[a-zA-Z0-9 \n.,]{0,60}") {
        let split = parse_thinking_response(&text);
        prop_assert!(split.reasoning.is_none());
        prop_assert_eq!(split.to_text(), text);
    }
}

// ============================================================================
// 组合
// ============================================================================

#[test]
fn test_code_request_with_three_tools() {
    let mut req = request(&["implement a function"], 3);
    let decision = apply_features(&mut req, None, &DeepSeekConfig::default());
    assert_eq!(decision.task, TaskType::Code);
    assert!(decision.thinking);
    assert_eq!(decision.source, ThinkingSource::Task);
    assert!(req.thinking_enabled());
    assert_eq!(req.temperature, 0.1);
}

#[test]
fn test_explicit_disable_wins() {
    let mut req = request(&["implement a function"], 0);
    let decision = apply_features(&mut req, Some(false), &DeepSeekConfig::default());
    assert!(!decision.thinking);
    assert_eq!(decision.source, ThinkingSource::Explicit);
    assert!(req.extra_body.is_none());
    // 参数表仍然生效
    assert_eq!(req.temperature, 0.1);
}

#[test]
fn test_explicit_enable_wins() {
    let mut req = request(&["hello"], 0);
    let decision = apply_features(&mut req, Some(true), &DeepSeekConfig::default());
    assert!(decision.thinking);
    assert!(req.thinking_enabled());
}

#[test]
fn test_creative_request_auto_detects_thinking() {
    // creative 参数表不强制思考，但 creative 正则会触发自动开启
    let mut req = request(&["write a poem"], 0);
    let decision = apply_features(&mut req, None, &DeepSeekConfig::default());
    assert_eq!(decision.task, TaskType::Creative);
    assert_eq!(
        decision.source,
        ThinkingSource::Detected(ThinkingTrigger::Pattern(ThinkingCategory::Creative))
    );
}

#[test]
fn test_plain_request_keeps_thinking_off() {
    let mut req = request(&["hello"], 0);
    let decision = apply_features(&mut req, None, &DeepSeekConfig::default());
    assert_eq!(decision.task, TaskType::Default);
    assert!(!decision.thinking);
    assert_eq!(decision.source, ThinkingSource::Off);
    assert!(req.extra_body.is_none());
}

#[test]
fn test_config_default_thinking() {
    let config = DeepSeekConfig {
        default_thinking: true,
        ..DeepSeekConfig::default()
    };
    let mut req = request(&["hello"], 0);
    let decision = apply_features(&mut req, None, &config);
    assert_eq!(decision.source, ThinkingSource::ConfigDefault);
    assert!(req.thinking_enabled());
}

#[test]
fn test_optimization_disabled_keeps_caller_parameters() {
    let config = DeepSeekConfig {
        optimize_parameters: false,
        ..DeepSeekConfig::default()
    };
    let mut req = request(&["implement the function"], 0);
    req.temperature = 0.42;
    let decision = apply_features(&mut req, None, &config);
    assert_eq!(req.temperature, 0.42);
    assert!(req.frequency_penalty.is_none());
    // 自动识别仍会开启思考
    assert!(decision.thinking);
}
