use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{info, warn};

use crate::error::BridgeError;

/// 服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub directory: DirectoryConfig,
    pub fcm: FcmConfig,
    pub delivery: DeliveryConfig,
    pub heartbeat: HeartbeatConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// MQTT 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker 地址
    pub host: String,
    /// Broker 端口
    pub port: u16,
    /// 订阅主题（支持通配符）
    pub topic: String,
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "redact_secret")]
    pub password: Option<String>,
    /// 客户端 ID（留空时自动生成）
    pub client_id: String,
    /// Keep-alive 间隔（秒）
    pub keep_alive_secs: u64,
    /// 订阅 QoS（0 / 1 / 2）
    pub qos: u8,
    /// 入站消息队列长度
    pub channel_capacity: usize,
    /// 连接断开后重连等待（秒）
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: "notification/#".to_string(),
            username: None,
            password: None,
            client_id: String::new(),
            keep_alive_secs: 60,
            qos: 1,
            channel_capacity: 64,
            reconnect_delay_secs: 5,
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// 实际使用的客户端 ID
    pub fn effective_client_id(&self) -> String {
        if self.client_id.trim().is_empty() {
            format!("mqtt-push-bridge-{}", uuid::Uuid::new_v4().simple())
        } else {
            self.client_id.clone()
        }
    }
}

/// Token 目录后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryBackend {
    /// Google Firestore 文档集合
    #[default]
    Firestore,
    /// 从 JSON 文件加载到内存
    File,
    /// 空的内存目录
    Memory,
}

impl FromStr for DirectoryBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown directory backend: {}", other)),
        }
    }
}

/// 密码、token 等只输出占位符
fn redact_secret<S>(value: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(_) => serializer.serialize_str("***"),
        None => serializer.serialize_none(),
    }
}

/// Token 目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// 关闭时只使用请求中的内联 token
    pub enabled: bool,
    pub backend: DirectoryBackend,
    /// Firestore 集合名称
    pub collection: String,
    /// 只向管理员条目推送
    pub admin_only: bool,
    /// Firestore 项目 ID（留空时使用 FCM 项目 / 服务账号中的项目）
    pub project_id: Option<String>,
    /// `backend = "file"` 时的 JSON 文件
    pub seed_file: Option<String>,
    /// Firestore API 地址
    pub endpoint: String,
    /// 单次目录调用的超时（秒）
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: DirectoryBackend::Firestore,
            collection: "notification".to_string(),
            admin_only: true,
            project_id: None,
            seed_file: None,
            endpoint: "https://firestore.googleapis.com".to_string(),
            timeout_secs: 10,
        }
    }
}

impl DirectoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// FCM 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FcmConfig {
    /// 服务账号 JSON 文件
    pub credentials_file: Option<String>,
    /// 留空时使用服务账号中的项目
    pub project_id: Option<String>,
    /// 预先获取的 access token（优先于服务账号，一般只用于调试）
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "redact_secret")]
    pub access_token: Option<String>,
    pub endpoint: String,
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            credentials_file: None,
            project_id: None,
            access_token: None,
            endpoint: "https://fcm.googleapis.com".to_string(),
        }
    }
}

/// 投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 请求未指定 ttl 时使用（秒）
    pub default_ttl_secs: u64,
    /// 单次投递的截止时间（秒）
    pub send_timeout_secs: u64,
    /// 单条消息内的并发投递数
    pub dispatch_concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 43200,
            send_timeout_secs: 10,
            dispatch_concurrency: 16,
        }
    }
}

impl DeliveryConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// 心跳发布配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// 不应落在订阅主题范围内
    pub topic: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
            topic: "mqtt-push/heartbeat".to_string(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Prometheus 指标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9464".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn listen_addr(&self) -> std::result::Result<SocketAddr, BridgeError> {
        self.listen
            .parse()
            .map_err(|e| BridgeError::Configuration(format!("invalid metrics.listen '{}': {}", self.listen, e)))
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
            file: None,
        }
    }
}

impl BridgeConfig {
    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content).with_context(|| format!("配置文件格式错误: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 从环境变量加载配置（MQTT_PUSH_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        // MQTT
        if let Ok(host) = env::var("MQTT_PUSH_BROKER_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = env::var("MQTT_PUSH_BROKER_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("MQTT_PUSH_BROKER_PORT 无效: {}", port))?;
        }
        if let Ok(topic) = env::var("MQTT_PUSH_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Ok(username) = env::var("MQTT_PUSH_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = env::var("MQTT_PUSH_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Ok(client_id) = env::var("MQTT_PUSH_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }

        // 目录
        if let Some(enabled) = env_bool("MQTT_PUSH_DIRECTORY_ENABLED")? {
            self.directory.enabled = enabled;
        }
        if let Ok(backend) = env::var("MQTT_PUSH_DIRECTORY_BACKEND") {
            self.directory.backend = backend
                .parse::<DirectoryBackend>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("MQTT_PUSH_DIRECTORY_BACKEND 无效: {}", backend))?;
        }
        if let Ok(collection) = env::var("MQTT_PUSH_COLLECTION") {
            self.directory.collection = collection;
        }
        if let Some(admin_only) = env_bool("MQTT_PUSH_ADMIN_ONLY")? {
            self.directory.admin_only = admin_only;
        }
        if let Ok(seed_file) = env::var("MQTT_PUSH_SEED_FILE") {
            self.directory.seed_file = Some(seed_file);
        }
        if let Ok(timeout) = env::var("MQTT_PUSH_DIRECTORY_TIMEOUT") {
            self.directory.timeout_secs = timeout
                .parse()
                .with_context(|| format!("MQTT_PUSH_DIRECTORY_TIMEOUT 无效: {}", timeout))?;
        }

        // FCM
        if let Ok(credentials) = env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            self.fcm.credentials_file = Some(credentials);
        }
        if let Ok(credentials) = env::var("MQTT_PUSH_CREDENTIALS_FILE") {
            self.fcm.credentials_file = Some(credentials);
        }
        if let Ok(project_id) = env::var("MQTT_PUSH_PROJECT_ID") {
            self.fcm.project_id = Some(project_id);
        }
        if let Ok(token) = env::var("MQTT_PUSH_ACCESS_TOKEN") {
            self.fcm.access_token = Some(token);
        }

        // 投递
        if let Ok(ttl) = env::var("MQTT_PUSH_DEFAULT_TTL") {
            self.delivery.default_ttl_secs = ttl
                .parse()
                .with_context(|| format!("MQTT_PUSH_DEFAULT_TTL 无效: {}", ttl))?;
        }

        // 心跳
        if let Some(enabled) = env_bool("MQTT_PUSH_HEARTBEAT_ENABLED")? {
            self.heartbeat.enabled = enabled;
        }
        if let Ok(topic) = env::var("MQTT_PUSH_HEARTBEAT_TOPIC") {
            self.heartbeat.topic = topic;
        }

        if let Ok(log_level) = env::var("MQTT_PUSH_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.broker_host {
            self.mqtt.host = host.clone();
        }
        if let Some(port) = cli.broker_port {
            self.mqtt.port = port;
        }
        if let Some(topic) = &cli.topic {
            self.mqtt.topic = topic.clone();
        }
        if let Some(admin_only) = cli.admin_only {
            self.directory.admin_only = admin_only;
        }
        if let Some(log_level) = cli.get_log_level() {
            self.logging.level = log_level;
        }
        if let Some(format) = cli.get_log_format() {
            self.logging.format = Some(format);
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 配置文件（如果指定），否则默认的 config.toml
        let mut config = match &cli.config_file {
            Some(config_file) if Path::new(config_file).exists() => {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            }
            Some(config_file) => {
                warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::default()
            }
            None if Path::new("config.toml").exists() => {
                info!("📄 从默认配置文件加载: config.toml");
                Self::from_toml_file("config.toml")?
            }
            None => Self::default(),
        };

        // 2. 环境变量
        config.merge_from_env()?;

        // 3. 命令行参数
        config.merge_from_cli(cli);

        config.validate()?;
        Ok(config)
    }

    /// 检查配置的一致性
    pub fn validate(&self) -> std::result::Result<(), BridgeError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(BridgeError::Configuration("mqtt.host must not be empty".into()));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(BridgeError::Configuration("mqtt.topic must not be empty".into()));
        }
        if self.mqtt.qos > 2 {
            return Err(BridgeError::Configuration(format!("mqtt.qos must be 0, 1 or 2, got {}", self.mqtt.qos)));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(BridgeError::Configuration("mqtt.channel_capacity must be > 0".into()));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(BridgeError::Configuration("mqtt.keep_alive_secs must be >= 5".into()));
        }
        if self.delivery.send_timeout_secs == 0 {
            return Err(BridgeError::Configuration("delivery.send_timeout_secs must be > 0".into()));
        }
        if self.delivery.dispatch_concurrency == 0 {
            return Err(BridgeError::Configuration("delivery.dispatch_concurrency must be > 0".into()));
        }
        if self.directory.enabled && self.directory.timeout_secs == 0 {
            return Err(BridgeError::Configuration("directory.timeout_secs must be > 0".into()));
        }
        if self.directory.enabled
            && self.directory.backend == DirectoryBackend::File
            && self.directory.seed_file.is_none()
        {
            return Err(BridgeError::Configuration(
                "directory.seed_file is required when directory.backend = \"file\"".into(),
            ));
        }
        if self.heartbeat.enabled {
            if self.heartbeat.interval_secs == 0 {
                return Err(BridgeError::Configuration("heartbeat.interval_secs must be > 0".into()));
            }
            if topic_matches(&self.mqtt.topic, &self.heartbeat.topic) {
                return Err(BridgeError::Configuration(format!(
                    "heartbeat.topic '{}' falls under the subscribed topic '{}'",
                    self.heartbeat.topic, self.mqtt.topic
                )));
            }
        }
        if self.metrics.enabled {
            self.metrics.listen_addr()?;
        }
        Ok(())
    }
}

/// 早期日志配置（只读取 `[logging]` 段）
#[derive(Debug, Default, Deserialize)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlLoggingOnly {
    logging: Option<EarlyLoggingConfig>,
}

/// 在日志系统初始化之前读取配置文件中的 `[logging]` 段；任何错误都返回空配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    let path = config_file.unwrap_or("config.toml");
    fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<TomlLoggingOnly>(&content).ok())
        .and_then(|toml| toml.logging)
        .unwrap_or_default()
}

/// MQTT 主题过滤匹配（`+` 单层，`#` 多层）
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => anyhow::bail!("{} 无效: {}", name, value),
        },
        Err(_) => Ok(None),
    }
}
