use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::auth::{
    AccessTokenSource, ServiceAccountKey, ServiceAccountTokenSource, StaticTokenSource,
    SCOPE_DATASTORE, SCOPE_FIREBASE_MESSAGING,
};
use crate::config::{BridgeConfig, DirectoryBackend};
use crate::error::{BridgeError, Result};
use crate::infra::metrics;
use crate::push::provider::{FcmProvider, MockProvider, PushProvider};
use crate::push::{CoordinatorOptions, DeliveryCoordinator, PushDispatcher};
use crate::repository::{FirestoreDirectory, InMemoryDirectory, TokenDirectory};
use crate::transport::{spawn_heartbeat, InboundMessage, MqttTransport};

/// Google 凭据：token 来源 + 凭据中的项目 ID
struct GoogleCredentials {
    tokens: Arc<dyn AccessTokenSource>,
    project_id: Option<String>,
}

/// MQTT → FCM 桥接服务
pub struct BridgeServer {
    config: BridgeConfig,
    coordinator: Arc<DeliveryCoordinator>,
}

impl BridgeServer {
    /// 根据配置组装各组件；`dry_run` 时使用日志 Provider 代替 FCM
    pub async fn new(config: BridgeConfig, dry_run: bool) -> Result<Self> {
        info!("🔧 初始化推送桥接服务组件...");
        config.validate()?;

        let uses_firestore =
            config.directory.enabled && config.directory.backend == DirectoryBackend::Firestore;
        let credentials = if !dry_run || uses_firestore {
            Some(load_credentials(&config)?)
        } else {
            None
        };

        // 推送 Provider
        let provider: Arc<dyn PushProvider> = match &credentials {
            Some(credentials) if !dry_run => {
                let project_id = config
                    .fcm
                    .project_id
                    .clone()
                    .or_else(|| credentials.project_id.clone())
                    .ok_or_else(|| {
                        BridgeError::Configuration(
                            "fcm.project_id is required when the credentials do not name a project".into(),
                        )
                    })?;
                info!("✅ FCM Provider 初始化完成（项目: {}）", project_id);
                Arc::new(FcmProvider::new(
                    config.fcm.endpoint.clone(),
                    project_id,
                    credentials.tokens.clone(),
                ))
            }
            _ => {
                info!("🧪 演练模式：推送只输出到日志");
                Arc::new(MockProvider::new())
            }
        };

        // Token 目录
        let directory = build_directory(&config, credentials.as_ref())?;

        let dispatcher = PushDispatcher::new(
            provider,
            config.delivery.default_ttl_secs,
            config.delivery.send_timeout(),
        );
        let coordinator = DeliveryCoordinator::new(
            dispatcher,
            directory,
            CoordinatorOptions {
                admin_only: config.directory.admin_only,
                dispatch_concurrency: config.delivery.dispatch_concurrency,
                directory_timeout: config.directory.timeout(),
            },
        );
        info!("✅ 投递协调器初始化完成");

        Ok(Self {
            config,
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn coordinator(&self) -> Arc<DeliveryCoordinator> {
        self.coordinator.clone()
    }

    /// 运行服务直到收到停止信号
    ///
    /// 停止时当前消息会处理完再退出；MQTT 事件循环意外结束时返回错误。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.config.metrics.enabled {
            let addr = self.config.metrics.listen_addr()?;
            metrics::init(addr).map_err(|e| {
                BridgeError::Configuration(format!("failed to start metrics listener on {}: {}", addr, e))
            })?;
            info!("📈 Prometheus 指标: http://{}/metrics", addr);
        }

        let transport = MqttTransport::new(&self.config.mqtt)?;
        let (sender, inbound) = mpsc::channel(self.config.mqtt.channel_capacity);

        let heartbeat = self.config.heartbeat.enabled.then(|| {
            spawn_heartbeat(
                transport.client(),
                self.config.heartbeat.topic.clone(),
                self.config.heartbeat.interval(),
                shutdown.clone(),
            )
        });
        let mqtt_task = transport.spawn(sender, shutdown.clone());

        info!("🚀 推送桥接服务已启动，等待消息...");
        let result = run_message_loop(&self.coordinator, inbound, shutdown).await;

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        if let Err(e) = mqtt_task.await {
            error!("❌ MQTT 事件循环异常退出: {}", e);
        }

        info!("👋 推送桥接服务已停止");
        result
    }
}

/// 逐条处理入站消息
///
/// 只在等待下一条消息时响应停止信号；已取出的消息总是完整走完投递流程。
pub async fn run_message_loop(
    coordinator: &DeliveryCoordinator,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = inbound.recv() => message,
        };

        let Some(message) = message else {
            return Err(BridgeError::Transport("MQTT event loop terminated".into()));
        };

        debug!("[SERVER] Handling message from {}", message.topic);
        let summary = coordinator.handle(&message.payload).await;
        if summary.is_rejected() {
            warn!("[SERVER] Message on {} dropped: {:?}", message.topic, summary.rejected);
        }
    }

    info!("[SERVER] Stop signal received, message loop finished");
    Ok(())
}

fn load_credentials(config: &BridgeConfig) -> Result<GoogleCredentials> {
    if let Some(token) = &config.fcm.access_token {
        info!("🔑 使用配置中的 access token");
        return Ok(GoogleCredentials {
            tokens: Arc::new(StaticTokenSource::new(token.clone())),
            project_id: None,
        });
    }

    let path = config.fcm.credentials_file.as_ref().ok_or_else(|| {
        BridgeError::Configuration(
            "fcm.credentials_file (or GOOGLE_APPLICATION_CREDENTIALS) is required".into(),
        )
    })?;
    let key = ServiceAccountKey::from_file(path)?;
    let source = ServiceAccountTokenSource::new(key, &[SCOPE_FIREBASE_MESSAGING, SCOPE_DATASTORE])?;
    info!("🔑 已加载服务账号凭据: {}", path);

    Ok(GoogleCredentials {
        project_id: source.project_id().map(str::to_string),
        tokens: Arc::new(source),
    })
}

fn build_directory(
    config: &BridgeConfig,
    credentials: Option<&GoogleCredentials>,
) -> Result<Option<Arc<dyn TokenDirectory>>> {
    let directory = &config.directory;
    if !directory.enabled {
        info!("ℹ️ Token 目录已禁用，只使用消息中的 tokens");
        return Ok(None);
    }

    let built: Arc<dyn TokenDirectory> = match directory.backend {
        DirectoryBackend::Firestore => {
            let credentials = credentials.ok_or_else(|| {
                BridgeError::Configuration("Firestore directory requires Google credentials".into())
            })?;
            let project_id = directory
                .project_id
                .clone()
                .or_else(|| config.fcm.project_id.clone())
                .or_else(|| credentials.project_id.clone())
                .ok_or_else(|| {
                    BridgeError::Configuration("directory.project_id is required for Firestore".into())
                })?;
            info!(
                "✅ Firestore 目录初始化完成（项目: {}, 集合: {}）",
                project_id, directory.collection
            );
            Arc::new(FirestoreDirectory::new(
                directory.endpoint.clone(),
                project_id,
                directory.collection.clone(),
                credentials.tokens.clone(),
            ))
        }
        DirectoryBackend::File => {
            let path = directory.seed_file.as_ref().ok_or_else(|| {
                BridgeError::Configuration("directory.seed_file is required for the file backend".into())
            })?;
            Arc::new(InMemoryDirectory::from_json_file(path)?)
        }
        DirectoryBackend::Memory => {
            info!("✅ 内存目录初始化完成（空）");
            Arc::new(InMemoryDirectory::new())
        }
    };

    Ok(Some(built))
}
