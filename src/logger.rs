//! 日志模块
//!
//! - `init_logging`: 安装 tracing-subscriber（JSON 或文本输出）
//! - `sanitize_log_message`: 写日志前脱敏上游错误体等外部文本

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// 初始化错误
pub type LoggerInitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 安装全局日志订阅者
///
/// `RUST_LOG` 存在时优先，否则使用配置中的级别。
/// 重复调用返回错误，不会覆盖已安装的订阅者。
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggerInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
}

/// 脱敏规则表
static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // Bearer token
        (r"Bearer\s+[A-Za-z0-9._-]+", "Bearer ***"),
        // API key 各种格式
        (
            r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (
            r#"access[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "access_token: ***",
        ),
        (r#"token["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#, "token: ***"),
        (
            r#"[Aa]uthorization["']?\s*[:=]\s*["']?[A-Za-z0-9._\s-]+"#,
            "authorization: ***",
        ),
        (r#"password["']?\s*[:=]\s*["']?[^\s"',}]+"#, "password: ***"),
        (
            r#"secret["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "secret: ***",
        ),
        // 裸露的 sk- 密钥
        (r"sk-[A-Za-z0-9_-]{8,}", "sk-***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
        Ok(regex) => Some((regex, replacement)),
        Err(e) => {
            eprintln!("invalid sanitize pattern {}: {}", pattern, e);
            None
        }
    })
    .collect()
});

/// 脱敏日志文本
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (regex, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = regex.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_bearer_token() {
        let input = "Authorization: Bearer abcDEF123._-XYZ";
        let output = sanitize_log_message(input);
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("***"));
    }

    #[test]
    fn test_sanitize_api_key() {
        let input = r#"request api_key="sk-test_123.456-ABC" end"#;
        let output = sanitize_log_message(input);
        assert!(output.contains("api_key: ***"));
        assert!(!output.contains("sk-test_123"));
    }

    #[test]
    fn test_sanitize_access_token() {
        let output = sanitize_log_message("access_token=atk_12345");
        assert!(output.contains("access_token: ***"));
        assert!(!output.contains("atk_12345"));
    }

    #[test]
    fn test_sanitize_password() {
        let output = sanitize_log_message(r#"{"password":"p@ssW0rd!"}"#);
        assert!(output.contains("password: ***"));
        assert!(!output.contains("p@ssW0rd!"));
    }

    #[test]
    fn test_sanitize_bare_key_in_gateway_error() {
        let input = r#"{"error":"invalid key sk-abcdefgh12345 for this model"}"#;
        let output = sanitize_log_message(input);
        assert!(!output.contains("abcdefgh12345"));
        assert!(output.contains("sk-***"));
        assert!(output.contains("for this model"));
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "这是一段普通日志，不包含任何敏感字段。";
        assert_eq!(sanitize_log_message(input), input);
    }

    #[test]
    fn test_init_logging_twice_fails_second_time() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Text,
        };
        // 其他测试可能已安装订阅者，这里只要求第二次一定失败
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
