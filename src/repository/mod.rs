use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Token 目录中的一个条目（一个用户 / 设备所有者）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    #[serde(default)]
    pub tokens: Vec<String>,
    /// 未设置时视为非管理员
    #[serde(default)]
    pub admin: bool,
    #[serde(default, rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl DirectoryEntry {
    pub fn new(id: impl Into<String>, tokens: Vec<String>, admin: bool) -> Self {
        Self {
            id: id.into(),
            tokens,
            admin,
            display_name: None,
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    /// 日志中使用的名称
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// 目录只读能力
#[async_trait]
pub trait DirectoryReader: Send + Sync {
    /// 列出条目；`admin_only` 为 true 时只返回管理员条目
    async fn list_entries(&self, admin_only: bool) -> Result<Vec<DirectoryEntry>, DirectoryError>;
}

/// 目录读写能力
#[async_trait]
pub trait TokenDirectory: DirectoryReader {
    /// 从指定条目中移除 token；token 不存在时为空操作
    async fn remove_token(&self, entry_id: &str, token: &str) -> Result<(), DirectoryError>;

    /// 返回包含该 token 的条目 ID
    async fn entries_containing(&self, token: &str) -> Result<Vec<String>, DirectoryError> {
        let entries = self.list_entries(false).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.contains(token))
            .map(|entry| entry.id)
            .collect())
    }
}

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDirectory;
pub use memory::InMemoryDirectory;
