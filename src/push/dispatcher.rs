use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::infra::metrics;
use crate::push::provider::PushProvider;
use crate::push::types::{short_token, DeliveryOutcome, FailureKind, Priority, PushMessage};

/// Push Dispatcher（推送投递器）
///
/// 职责：
/// - 组装纯 data 消息
/// - 在截止时间内调用 Provider 一次
/// - 将 Provider 的结果分类为 DeliveryOutcome
pub struct PushDispatcher {
    provider: Arc<dyn PushProvider>,
    default_ttl_secs: u64,
    send_timeout: Duration,
}

impl PushDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>, default_ttl_secs: u64, send_timeout: Duration) -> Self {
        Self {
            provider,
            default_ttl_secs,
            send_timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// 构建发给 Provider 的消息：先放 title / body，再合并 data（data 中的同名键覆盖）
    pub fn build_message(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        priority: Priority,
        ttl: Option<u64>,
    ) -> PushMessage {
        let mut payload = HashMap::with_capacity(data.len() + 2);
        payload.insert("title".to_string(), title.to_string());
        payload.insert("body".to_string(), body.to_string());
        payload.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));

        PushMessage {
            token: token.to_string(),
            data: payload,
            priority,
            ttl_secs: ttl.unwrap_or(self.default_ttl_secs),
        }
    }

    /// 对一个 token 做一次投递
    pub async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        priority: Priority,
        ttl: Option<u64>,
    ) -> DeliveryOutcome {
        let message = self.build_message(token, title, body, data, priority, ttl);

        let result = match tokio::time::timeout(self.send_timeout, self.provider.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        let outcome = match result {
            Ok(()) => {
                debug!("[DISPATCHER] Delivered to token {}…", short_token(token));
                DeliveryOutcome::delivered(token)
            }
            Err(e) => {
                let kind = classify(&e);
                warn!(
                    "[DISPATCHER] Delivery to token {}… failed ({}): {}",
                    short_token(token),
                    kind.as_str(),
                    e
                );
                DeliveryOutcome::failed(token, kind)
            }
        };

        metrics::record_delivery(self.provider.name(), outcome.failure_kind);
        outcome
    }
}

/// Provider 错误分类
pub fn classify(error: &ProviderError) -> FailureKind {
    match error {
        ProviderError::Unregistered(_) | ProviderError::InvalidToken(_) => FailureKind::InvalidToken,
        ProviderError::RateLimited(_)
        | ProviderError::Unavailable(_)
        | ProviderError::Network(_)
        | ProviderError::Timeout => FailureKind::Transient,
        ProviderError::Auth(_) | ProviderError::Rejected { .. } => FailureKind::Unknown,
    }
}
