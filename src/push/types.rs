use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 推送优先级
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// 一条 MQTT 消息解析出的推送请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    /// 原样转发给设备的键值对
    pub data: HashMap<String, String>,
    /// 显式指定的 token 列表（已清洗）；非空时跳过目录查询
    pub tokens: Option<Vec<String>>,
    /// 原始消息带了非空的 `tokens` 字段；清洗后即使为空也不查询目录
    #[serde(skip)]
    pub tokens_explicit: bool,
    pub priority: Priority,
    /// 消息存活时间（秒）
    pub ttl: Option<u64>,
}

impl NotificationRequest {
    /// 内联 token 列表；返回 `None` 时才查询目录
    pub fn inline_tokens(&self) -> Option<&[String]> {
        match &self.tokens {
            Some(tokens) if !tokens.is_empty() || self.tokens_explicit => Some(tokens.as_slice()),
            None if self.tokens_explicit => Some(&[]),
            _ => None,
        }
    }
}

/// 发给推送服务商的单条消息（纯 data 消息，由客户端负责渲染）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub data: HashMap<String, String>,
    pub priority: Priority,
    pub ttl_secs: u64,
}

/// 投递失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// token 已失效，需要从目录中清理
    InvalidToken,
    /// 限流、服务不可用、网络问题
    Transient,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidToken => "invalid_token",
            FailureKind::Transient => "transient",
            FailureKind::Unknown => "unknown",
        }
    }
}

/// 单个 token 的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub token: String,
    pub success: bool,
    pub failure_kind: Option<FailureKind>,
}

impl DeliveryOutcome {
    pub fn delivered(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            success: true,
            failure_kind: None,
        }
    }

    pub fn failed(token: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            token: token.into(),
            success: false,
            failure_kind: Some(kind),
        }
    }

    pub fn is_invalid_token(&self) -> bool {
        self.failure_kind == Some(FailureKind::InvalidToken)
    }
}

/// 消息被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Malformed,
    DirectoryUnavailable,
}

/// 单条消息处理完成后的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub sent_count: usize,
    pub failed_count: usize,
    pub pruned_count: usize,
    pub rejected: Option<RejectReason>,
}

impl DeliverySummary {
    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            rejected: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.is_some()
    }
}

/// 单条消息的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Parsed,
    Resolved,
    Dispatching,
    Reconciled,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Received => "received",
            PipelineStage::Parsed => "parsed",
            PipelineStage::Resolved => "resolved",
            PipelineStage::Dispatching => "dispatching",
            PipelineStage::Reconciled => "reconciled",
        };
        f.write_str(s)
    }
}

/// 日志中只显示 token 前缀
pub fn short_token(token: &str) -> &str {
    match token.char_indices().nth(12) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
