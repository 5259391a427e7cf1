use anyhow::Context;
use tokio_util::sync::CancellationToken;

use claude_deepseek_proxy::config::Config;
use claude_deepseek_proxy::logger;
use claude_deepseek_proxy::server::{run_server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_path) = Config::load().context("加载配置失败")?;
    config.ensure_valid().context("配置校验失败")?;

    logger::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("初始化日志失败: {}", e))?;

    match &config_path {
        Some(path) => tracing::info!("[MAIN] 使用配置文件: {}", path.display()),
        None => tracing::info!("[MAIN] 未找到配置文件，使用默认配置"),
    }

    let state = AppState::new(config).context("创建上游客户端失败")?;
    if let Some(key) = state.auth.ensure_startup_key() {
        tracing::warn!("[MAIN] 未配置 API Key，已生成本次运行的密钥: {}", key);
    }
    let shutdown = CancellationToken::new();
    let tasks = state.spawn_background_tasks(&shutdown);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[MAIN] 监听停止信号失败: {}", e);
            return;
        }
        tracing::info!("[MAIN] 收到 Ctrl+C，开始关闭");
        signal_token.cancel();
    });

    let result = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }

    result.context("服务运行失败")
}
