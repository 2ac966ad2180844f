use async_trait::async_trait;

use crate::error::ProviderError;
use crate::push::types::PushMessage;

/// Push Provider Trait（推送提供者接口）
///
/// 每次调用只做一次投递尝试，不做重试。
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// 发送推送
    async fn send(&self, message: &PushMessage) -> Result<(), ProviderError>;

    /// Provider 名称（用于日志）
    fn name(&self) -> &'static str;
}
