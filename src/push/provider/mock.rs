use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ProviderError;
use crate::push::provider::provider_trait::PushProvider;
use crate::push::types::PushMessage;

/// Mock Provider（用于测试和 `--dry-run`）
///
/// 不调用真实 API，只打印日志。可以为指定 token 预设失败结果。
/// 只有 [`MockProvider::recording`] 创建的实例才保存发送过的消息。
#[derive(Default)]
pub struct MockProvider {
    failures: HashMap<String, ProviderError>,
    delay: Option<Duration>,
    /// `None` 时不保存
    sent: Option<Mutex<Vec<PushMessage>>>,
}

impl MockProvider {
    /// 只输出日志
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存每条尝试过的消息，供测试检查
    pub fn recording() -> Self {
        Self {
            sent: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    /// 对该 token 的投递返回指定错误
    pub fn fail_token(mut self, token: impl Into<String>, error: ProviderError) -> Self {
        self.failures.insert(token.into(), error);
        self
    }

    /// 每次投递前等待（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 所有尝试过的投递（包括失败的）；未开启记录时为空
    pub async fn sent(&self) -> Vec<PushMessage> {
        match &self.sent {
            Some(sent) => sent.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn sent_tokens(&self) -> Vec<String> {
        self.sent().await.into_iter().map(|m| m.token).collect()
    }
}

#[async_trait]
impl PushProvider for MockProvider {
    async fn send(&self, message: &PushMessage) -> Result<(), ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(sent) = &self.sent {
            sent.lock().await.push(message.clone());
        }
        info!(
            "[MOCK PUSH] priority={}, ttl={}s, data={:?}",
            message.priority.as_str(),
            message.ttl_secs,
            message.data
        );

        match self.failures.get(&message.token) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(token: &str) -> PushMessage {
        PushMessage {
            token: token.to_string(),
            data: HashMap::new(),
            priority: Default::default(),
            ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_log_only_by_default() {
        let provider = MockProvider::new();
        for i in 0..100 {
            provider.send(&message(&format!("t{}", i))).await.unwrap();
        }
        assert!(provider.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_recording_keeps_failed_attempts() {
        let provider =
            MockProvider::recording().fail_token("dead", ProviderError::Unregistered("gone".into()));
        provider.send(&message("live")).await.unwrap();
        assert!(provider.send(&message("dead")).await.is_err());
        assert_eq!(provider.sent_tokens().await, vec!["live".to_string(), "dead".to_string()]);
    }
}
