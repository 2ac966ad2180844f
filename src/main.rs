use std::fs;
use std::process;

use anyhow::{Context, Result};
use mqtt_push_bridge::{
    cli::{Cli, Commands},
    config::{self, BridgeConfig},
    logging, BridgeServer,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => return generate_config(path),
            Commands::ValidateConfig { path } => return validate_config(path),
            Commands::ShowConfig => return show_config(&cli),
            Commands::Send { path } => return send_file(&cli, path).await,
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.clone().or(early_log.file);

    let log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file.as_deref(), cli.quiet)?;

    tracing::info!("🚀 MQTT Push Bridge starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = BridgeConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Bridge Configuration:");
    tracing::info!("  - Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    tracing::info!("  - Topic: {} (QoS {})", config.mqtt.topic, config.mqtt.qos);
    tracing::info!(
        "  - Directory: {} ({:?}, collection: {})",
        if config.directory.enabled { "enabled" } else { "disabled" },
        config.directory.backend,
        config.directory.collection
    );
    tracing::info!("  - Admin Only: {}", config.directory.admin_only);
    tracing::info!("  - Default TTL: {}s", config.delivery.default_ttl_secs);
    tracing::info!("  - Dispatch Concurrency: {}", config.delivery.dispatch_concurrency);
    tracing::info!("  - Heartbeat: {}", config.heartbeat.enabled);
    tracing::info!("  - Metrics: {}", config.metrics.enabled);
    tracing::info!("  - Log Level: {}", log_level);
    if let Some(f) = &log_file {
        tracing::info!("  - Log File: {}", f);
    }

    let server = match BridgeServer::new(config, cli.dry_run).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 服务初始化失败: {}", e);
            tracing::error!("💡 请检查凭据文件、项目 ID 及目录配置后重试");
            drop(log_guard);
            process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("🛑 正在停止，等待当前消息处理完成...");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = server.run(shutdown_rx).await {
        tracing::error!("❌ 服务运行失败: {}", e);
        tracing::error!("💡 服务将退出");
        drop(log_guard);
        process::exit(1);
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("⚠️ 无法监听 Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("⚠️ 无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("收到 SIGINT (Ctrl+C)"),
        _ = terminate => tracing::info!("收到 SIGTERM"),
    }
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# MQTT Push Bridge 配置文件
# 此文件由 mqtt-push-bridge generate-config 生成

[mqtt]
host = "localhost"
port = 1883
topic = "notification/#"
# username = "bridge"
# password = "secret"
# client_id = "mqtt-push-bridge-1"
keep_alive_secs = 60
qos = 1
channel_capacity = 64
reconnect_delay_secs = 5

[directory]
enabled = true
# firestore / file / memory
backend = "firestore"
collection = "notification"
admin_only = true
# project_id = "my-firebase-project"
# seed_file = "./tokens.json"
# 单次目录调用超时（秒）
timeout_secs = 10

[fcm]
# 也可以通过 GOOGLE_APPLICATION_CREDENTIALS 指定
credentials_file = "./firebase-credentials.json"
# project_id = "my-firebase-project"

[delivery]
default_ttl_secs = 43200
send_timeout_secs = 10
dispatch_concurrency = 16

[heartbeat]
enabled = false
interval_secs = 60
topic = "mqtt-push/heartbeat"

[metrics]
enabled = false
listen = "0.0.0.0:9464"

[logging]
level = "info"
format = "compact"
# file = "./logs/bridge.log"
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = BridgeConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config
        .validate()
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    println!("  - Topic: {}", config.mqtt.topic);
    println!("  - Directory: {:?} (enabled: {})", config.directory.backend, config.directory.enabled);
    println!("  - Admin Only: {}", config.directory.admin_only);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = BridgeConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}

/// 将一个消息文件走一遍投递流程
async fn send_file(cli: &Cli, path: &str) -> Result<()> {
    let level = cli.get_log_level().unwrap_or_else(|| "info".to_string());
    let _guard = logging::init_logging(&level, cli.get_log_format().as_deref(), None, cli.quiet)?;

    let payload = fs::read(path).with_context(|| format!("无法读取消息文件: {}", path))?;
    let config = BridgeConfig::load(cli).context("加载配置失败")?;
    let server = BridgeServer::new(config, cli.dry_run)
        .await
        .context("服务初始化失败")?;

    let summary = server.coordinator().handle(&payload).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(reason) = summary.rejected {
        anyhow::bail!("消息被丢弃: {:?}", reason);
    }
    Ok(())
}
