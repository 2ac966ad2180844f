use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{DirectoryError, ResolveError};
use crate::infra::metrics;
use crate::push::dispatcher::PushDispatcher;
use crate::push::parser;
use crate::push::resolver;
use crate::push::types::{
    short_token, DeliveryOutcome, DeliverySummary, NotificationRequest, PipelineStage, RejectReason,
};
use crate::repository::{DirectoryEntry, DirectoryReader, TokenDirectory};

/// Coordinator 选项（来自配置）
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// 目录查询时只取管理员条目
    pub admin_only: bool,
    /// 单条消息内并发投递的上限
    pub dispatch_concurrency: usize,
    /// 单次目录调用（查询、清理）的超时
    pub directory_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            admin_only: false,
            dispatch_concurrency: 16,
            directory_timeout: Duration::from_secs(10),
        }
    }
}

/// 未启用目录时使用：没有内联 token 的请求解析为空集
struct NoDirectory;

#[async_trait]
impl DirectoryReader for NoDirectory {
    async fn list_entries(&self, _admin_only: bool) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        debug!("[COORDINATOR] Directory disabled, only inline tokens are used");
        Ok(Vec::new())
    }
}

/// Delivery Coordinator（投递协调器）
///
/// 每条消息：Received → Parsed → Resolved → Dispatching → Reconciled。
/// 解析 / 目录失败只丢弃当前消息；投递失败互不影响；清理失败只记录日志。
pub struct DeliveryCoordinator {
    dispatcher: PushDispatcher,
    directory: Option<Arc<dyn TokenDirectory>>,
    options: CoordinatorOptions,
}

impl DeliveryCoordinator {
    pub fn new(
        dispatcher: PushDispatcher,
        directory: Option<Arc<dyn TokenDirectory>>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            options: CoordinatorOptions {
                dispatch_concurrency: options.dispatch_concurrency.max(1),
                ..options
            },
        }
    }

    /// 处理一条原始消息
    pub async fn handle(&self, raw: &[u8]) -> DeliverySummary {
        let span = info_span!("message", id = %Uuid::new_v4());
        async move {
            let started = Instant::now();
            metrics::record_message_received();
            debug!(stage = %PipelineStage::Received, bytes = raw.len(), "[COORDINATOR] Message received");

            let summary = match parser::parse(raw) {
                Ok(req) => self.process(req).await,
                Err(e) => {
                    warn!("[COORDINATOR] Dropping message, payload rejected: {}", e);
                    reject(RejectReason::Malformed)
                }
            };

            metrics::record_message_duration(started.elapsed().as_secs_f64());
            summary
        }
        .instrument(span)
        .await
    }

    /// 处理已解析的请求（跳过解析阶段，供程序化调用）
    pub async fn handle_request(&self, req: NotificationRequest) -> DeliverySummary {
        let span = info_span!("message", id = %Uuid::new_v4());
        self.process(req).instrument(span).await
    }

    async fn process(&self, req: NotificationRequest) -> DeliverySummary {
        debug!(stage = %PipelineStage::Parsed, title = %req.title, "[COORDINATOR] Payload parsed");

        let tokens = match self.resolve_targets(&req).await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("[COORDINATOR] Dropping message, cannot resolve targets: {}", e);
                return reject(RejectReason::DirectoryUnavailable);
            }
        };
        debug!(stage = %PipelineStage::Resolved, targets = tokens.len(), "[COORDINATOR] Targets resolved");

        if tokens.is_empty() {
            warn!("[COORDINATOR] No push tokens available, nothing to send");
            debug!(stage = %PipelineStage::Reconciled, "[COORDINATOR] Done");
            return DeliverySummary::default();
        }

        info!(
            "[COORDINATOR] Sending notification to {} devices via {}",
            tokens.len(),
            self.dispatcher.provider_name()
        );
        debug!(stage = %PipelineStage::Dispatching, "[COORDINATOR] Dispatching");
        let outcomes = self.dispatch_all(&req, &tokens).await;

        let summary = self.reconcile(&outcomes).await;
        info!(
            "[COORDINATOR] Successfully sent: {}, Failed: {}, Pruned: {}",
            summary.sent_count, summary.failed_count, summary.pruned_count
        );
        debug!(stage = %PipelineStage::Reconciled, "[COORDINATOR] Done");
        summary
    }

    async fn resolve_targets(&self, req: &NotificationRequest) -> Result<Vec<String>, ResolveError> {
        let deadline = self.options.directory_timeout;
        let resolved = match &self.directory {
            Some(directory) => {
                tokio::time::timeout(
                    deadline,
                    resolver::resolve(req, directory.as_ref(), self.options.admin_only),
                )
                .await
            }
            None => Ok(resolver::resolve(req, &NoDirectory, self.options.admin_only).await),
        };

        resolved.unwrap_or_else(|_| Err(ResolveError::from(directory_timed_out(deadline))))
    }

    /// 并发投递，每个 token 独立返回结果
    async fn dispatch_all(&self, req: &NotificationRequest, tokens: &[String]) -> Vec<DeliveryOutcome> {
        let sends: Vec<_> = tokens
            .iter()
            .map(|token| {
                self.dispatcher
                    .send(token, &req.title, &req.body, &req.data, req.priority, req.ttl)
            })
            .collect();
        futures::stream::iter(sends)
            .buffer_unordered(self.options.dispatch_concurrency)
            .collect()
            .await
    }

    /// 汇总结果，并清理无效 token
    async fn reconcile(&self, outcomes: &[DeliveryOutcome]) -> DeliverySummary {
        let sent_count = outcomes.iter().filter(|o| o.success).count();
        let failed_count = outcomes.len() - sent_count;

        let invalid: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.is_invalid_token())
            .map(|o| o.token.as_str())
            .collect();

        let pruned_count = match (&self.directory, invalid.is_empty()) {
            (_, true) => 0,
            (None, false) => {
                debug!(
                    "[COORDINATOR] Directory disabled, {} invalid tokens not pruned",
                    invalid.len()
                );
                0
            }
            (Some(directory), false) => {
                info!("[COORDINATOR] Pruning {} invalid tokens", invalid.len());
                let deadline = self.options.directory_timeout;
                join_all(
                    invalid
                        .iter()
                        .map(|token| prune_token(directory.as_ref(), token, deadline)),
                )
                    .await
                    .into_iter()
                    .sum()
            }
        };

        DeliverySummary {
            sent_count,
            failed_count,
            pruned_count,
            rejected: None,
        }
    }
}

fn reject(reason: RejectReason) -> DeliverySummary {
    metrics::record_message_rejected(reason);
    debug!(stage = %PipelineStage::Reconciled, "[COORDINATOR] Message dropped");
    DeliverySummary::rejected(reason)
}

fn directory_timed_out(deadline: Duration) -> DirectoryError {
    DirectoryError::Unavailable(format!("no response within {}ms", deadline.as_millis()))
}

/// 目录调用超时视为目录不可用
async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, DirectoryError>>,
) -> Result<T, DirectoryError> {
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or_else(|_| Err(directory_timed_out(deadline)))
}

/// 从所有包含该 token 的条目中移除它；返回成功移除的条目数。
/// 任何失败只记录日志，不影响其他 token。
async fn prune_token(directory: &dyn TokenDirectory, token: &str, deadline: Duration) -> usize {
    let entry_ids = match with_deadline(deadline, directory.entries_containing(token)).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(
                "[COORDINATOR] Failed to look up entries for token {}…: {}",
                short_token(token),
                e
            );
            metrics::record_prune_failure();
            return 0;
        }
    };

    let mut removed = 0;
    for entry_id in entry_ids {
        match with_deadline(deadline, directory.remove_token(&entry_id, token)).await {
            Ok(()) => removed += 1,
            // 条目已被删除，等同于已清理
            Err(DirectoryError::NotFound(_)) => {
                debug!("[COORDINATOR] Entry {} vanished before prune", entry_id);
            }
            Err(e) => {
                warn!(
                    "[COORDINATOR] Failed to remove token {}… from entry {}: {}",
                    short_token(token),
                    entry_id,
                    e
                );
                metrics::record_prune_failure();
            }
        }
    }

    if removed > 0 {
        info!(
            "[COORDINATOR] Removed invalid token {}… from {} entries",
            short_token(token),
            removed
        );
        metrics::record_token_pruned(removed);
    }
    removed
}

