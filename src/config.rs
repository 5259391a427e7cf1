//! 配置管理
//!
//! 从 YAML 文件加载配置，再用环境变量覆盖。所有字段都有默认值，
//! 配置文件缺失时使用默认配置启动。
//!
//! # 查找顺序
//!
//! 1. `PROXY_CONFIG_PATH`
//! 2. `config/default.yaml`
//! 3. `/app/config/default.yaml`
//! 4. `~/.claude-deepseek-proxy/config.yaml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("无法读取配置文件 {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("配置文件格式错误 {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("环境变量 {name} 的值无效: {value}")]
    InvalidEnv { name: String, value: String },
    #[error("配置无效: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub deepseek: DeepSeekConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 请求体大小上限（字节）
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 上游 OpenAI 兼容网关配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://your-openai-gateway.com/v1".to_string(),
            api_key: String::new(),
            timeout_secs: 300,
            connect_timeout_secs: 30,
        }
    }
}

impl OpenAiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// DeepSeek 模型配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepSeekConfig {
    /// 上游模型名称
    pub model_name: String,
    /// 调用方未指定时是否默认开启思考模式
    pub default_thinking: bool,
    /// 请求未指定 max_tokens 时的默认值
    pub max_tokens: u32,
    /// 请求未指定 temperature 时的默认值
    pub temperature: f32,
    /// 请求未指定 top_p 时的默认值
    pub top_p: f32,
    /// 是否按任务类型覆盖采样参数
    pub optimize_parameters: bool,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            model_name: "deepseek-v3.1".to_string(),
            default_thinking: false,
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 0.8,
            optimize_parameters: true,
        }
    }
}

/// 认证与限流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub require_api_key: bool,
    pub allowed_keys: Vec<String>,
    pub rate_limit_requests_per_minute: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            allowed_keys: Vec::new(),
            rate_limit_requests_per_minute: 60,
        }
    }
}

/// 响应缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    /// 默认 TTL（秒）
    pub default_ttl_secs: u64,
    /// 过期清理周期（秒）
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

/// 流式处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// 最大并发流数量
    pub max_concurrent_streams: usize,
    /// 等待流槽位的最长时间（秒）
    pub admission_timeout_secs: u64,
    /// 超过该时长的流会被回收（秒）
    pub stale_after_secs: u64,
    /// 回收任务周期（秒）
    pub sweep_interval_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 10,
            admission_timeout_secs: 30,
            stale_after_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

// ============================================================================
// 加载
// ============================================================================

/// 配置文件环境变量
pub const CONFIG_PATH_ENV: &str = "PROXY_CONFIG_PATH";

/// 按查找顺序返回候选路径
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            paths.push(PathBuf::from(path));
        }
    }
    paths.push(PathBuf::from("config/default.yaml"));
    paths.push(PathBuf::from("/app/config/default.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".claude-deepseek-proxy").join("config.yaml"));
    }
    paths
}

impl Config {
    /// 解析 YAML 文本
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// 从指定文件加载（不应用环境变量）
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 按查找顺序加载配置文件并应用环境变量覆盖
    ///
    /// # 返回
    ///
    /// 配置与实际使用的文件路径（未找到文件时为 `None`）
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = candidate_paths().into_iter().find(|p| p.is_file());
        let mut config = match &path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok((config, path))
    }

    /// 应用进程环境变量
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// 使用给定的查找函数应用覆盖
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = lookup("OPENAI_TIMEOUT") {
            self.openai.timeout_secs = parse_env("OPENAI_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("DEEPSEEK_MODEL") {
            self.deepseek.model_name = v;
        }
        if let Some(v) = lookup("DEEPSEEK_THINKING") {
            self.deepseek.default_thinking = parse_bool("DEEPSEEK_THINKING", &v)?;
        }
        if let Some(v) = lookup("DEEPSEEK_MAX_TOKENS") {
            self.deepseek.max_tokens = parse_env("DEEPSEEK_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("DEEPSEEK_TEMPERATURE") {
            self.deepseek.temperature = parse_env("DEEPSEEK_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("REQUIRE_API_KEY") {
            self.auth.require_api_key = parse_bool("REQUIRE_API_KEY", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.auth.rate_limit_requests_per_minute = parse_env("RATE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("ALLOWED_API_KEYS") {
            self.auth.allowed_keys = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("MAX_CONCURRENT_STREAMS") {
            self.streaming.max_concurrent_streams = parse_env("MAX_CONCURRENT_STREAMS", &v)?;
        }
        Ok(())
    }

    /// 校验配置
    ///
    /// # 返回
    ///
    /// 问题描述列表，为空表示配置有效
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        match url::Url::parse(&self.openai.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => issues.push("OpenAI gateway endpoint must be a valid HTTP/HTTPS URL".to_string()),
        }
        if self.server.port == 0 {
            issues.push("Server port must be between 1 and 65535".to_string());
        }
        if !(0.0..=2.0).contains(&self.deepseek.temperature) {
            issues.push("Temperature must be between 0.0 and 2.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.deepseek.top_p) {
            issues.push("top_p must be between 0.0 and 1.0".to_string());
        }
        if self.deepseek.max_tokens == 0 {
            issues.push("max_tokens must be greater than 0".to_string());
        }
        if self.streaming.max_concurrent_streams == 0 {
            issues.push("max_concurrent_streams must be greater than 0".to_string());
        }
        if self.streaming.sweep_interval_secs == 0 {
            issues.push("sweep_interval_secs must be greater than 0".to_string());
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            issues.push("cache max_entries must be greater than 0 when the cache is enabled".to_string());
        }
        issues
    }

    /// 校验配置，存在问题时返回 `ConfigError::Invalid`
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.deepseek.model_name, "deepseek-v3.1");
        assert_eq!(config.deepseek.max_tokens, 4096);
        assert_eq!(config.streaming.max_concurrent_streams, 10);
        assert_eq!(config.streaming.stale_after_secs, 300);
        assert_eq!(config.auth.rate_limit_requests_per_minute, 60);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            r#"
server:
  port: 9000
deepseek:
  default_thinking: true
streaming:
  max_concurrent_streams: 3
logging:
  format: text
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.deepseek.default_thinking);
        assert_eq!(config.deepseek.model_name, "deepseek-v3.1");
        assert_eq!(config.streaming.max_concurrent_streams, 3);
        assert_eq!(config.streaming.admission_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "openai:\n  base_url: http://localhost:9999/v1\n  api_key: gw-key").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.openai.base_url, "http://localhost:9999/v1");
        assert_eq!(config.openai.api_key, "gw-key");
        assert_eq!(config.openai.timeout_secs, 300);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides_from(lookup(&[
                ("SERVER_PORT", "8181"),
                ("LOG_LEVEL", "DEBUG"),
                ("OPENAI_TIMEOUT", "60"),
                ("DEEPSEEK_MODEL", "deepseek-r1"),
                ("DEEPSEEK_THINKING", "true"),
                ("DEEPSEEK_TEMPERATURE", "0.5"),
                ("REQUIRE_API_KEY", "false"),
                ("ALLOWED_API_KEYS", "sk-a, sk-b ,,"),
                ("MAX_CONCURRENT_STREAMS", "25"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8181);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.openai.timeout_secs, 60);
        assert_eq!(config.deepseek.model_name, "deepseek-r1");
        assert!(config.deepseek.default_thinking);
        assert_eq!(config.deepseek.temperature, 0.5);
        assert!(!config.auth.require_api_key);
        assert_eq!(config.auth.allowed_keys, vec!["sk-a", "sk-b"]);
        assert_eq!(config.streaming.max_concurrent_streams, 25);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_overrides_from(lookup(&[("SERVER_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == "SERVER_PORT"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());

        config.openai.base_url = "ftp://gateway".to_string();
        config.deepseek.temperature = 3.0;
        config.deepseek.top_p = 1.5;
        config.streaming.max_concurrent_streams = 0;
        let issues = config.validate();
        assert_eq!(issues.len(), 4);
        assert!(issues[0].contains("HTTP/HTTPS"));
    }

    #[test]
    fn test_zero_stream_limit_is_fatal() {
        let mut config = Config::default();
        assert!(config.ensure_valid().is_ok());

        config.streaming.max_concurrent_streams = 0;
        let err = config.ensure_valid().unwrap_err();
        match err {
            ConfigError::Invalid(issues) => {
                assert_eq!(issues.len(), 1);
                assert!(issues[0].contains("max_concurrent_streams"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
