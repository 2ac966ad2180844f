//! Prometheus 指标：收到的消息、被丢弃的消息、投递结果、token 清理
//!
//! 通过 `init()` 安装全局 Recorder 并启动 HTTP 抓取端点。未初始化时所有记录函数为空操作。

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::push::types::{FailureKind, RejectReason};

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// 指标名称
const COUNTER_MESSAGES_RECEIVED: &str = "mqtt_push_messages_received_total";
const COUNTER_MESSAGES_REJECTED: &str = "mqtt_push_messages_rejected_total";
const COUNTER_DELIVERIES: &str = "mqtt_push_deliveries_total";
const COUNTER_TOKENS_PRUNED: &str = "mqtt_push_tokens_pruned_total";
const COUNTER_PRUNE_FAILURES: &str = "mqtt_push_prune_failures_total";
const HISTOGRAM_MESSAGE_DURATION: &str = "mqtt_push_message_duration_seconds";

/// 安装 Prometheus Recorder 并在 `listen` 上暴露 `/metrics`。
/// 仅需在进程内调用一次；必须在 tokio 运行时内调用。
pub fn init(listen: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if INSTALLED.get().is_some() {
        return Err("metrics already initialized".into());
    }
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    INSTALLED
        .set(listen)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

pub fn record_message_received() {
    metrics::counter!(COUNTER_MESSAGES_RECEIVED).increment(1);
}

pub fn record_message_rejected(reason: RejectReason) {
    let reason = match reason {
        RejectReason::Malformed => "malformed",
        RejectReason::DirectoryUnavailable => "directory_unavailable",
    };
    metrics::counter!(COUNTER_MESSAGES_REJECTED, "reason" => reason).increment(1);
}

/// 记录一次投递结果：`outcome` 为 `sent` 或失败分类
pub fn record_delivery(provider: &'static str, failure: Option<FailureKind>) {
    let outcome = failure.map(|k| k.as_str()).unwrap_or("sent");
    metrics::counter!(COUNTER_DELIVERIES, "provider" => provider, "outcome" => outcome).increment(1);
}

pub fn record_token_pruned(count: usize) {
    metrics::counter!(COUNTER_TOKENS_PRUNED).increment(count as u64);
}

pub fn record_prune_failure() {
    metrics::counter!(COUNTER_PRUNE_FAILURES).increment(1);
}

/// 记录单条消息从收到到汇总完成的耗时
pub fn record_message_duration(duration_secs: f64) {
    metrics::histogram!(HISTOGRAM_MESSAGE_DURATION).record(duration_secs);
}
