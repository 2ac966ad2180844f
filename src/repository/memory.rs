use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{BridgeError, DirectoryError, Result};
use crate::repository::{DirectoryEntry, DirectoryReader, TokenDirectory};

/// 内存 Token 目录
///
/// 用于测试、`--dry-run`，以及 `directory.backend = "file"` 时从 JSON 文件加载的本地目录。
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: RwLock<Vec<DirectoryEntry>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// 从 JSON 文件加载：`[{"id": "...", "tokens": [...], "admin": true}]`
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<DirectoryEntry> = serde_json::from_str(&content)?;
        if let Some(dup) = first_duplicate_id(&entries) {
            return Err(BridgeError::Configuration(format!(
                "duplicate directory entry id '{}' in {:?}",
                dup,
                path.as_ref()
            )));
        }
        info!(
            "[DIRECTORY] Loaded {} entries from {:?}",
            entries.len(),
            path.as_ref()
        );
        Ok(Self::from_entries(entries))
    }

    /// 新增或替换条目
    pub async fn upsert(&self, entry: DirectoryEntry) {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub async fn get(&self, entry_id: &str) -> Option<DirectoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<DirectoryEntry> {
        self.entries.read().await.clone()
    }
}

fn first_duplicate_id(entries: &[DirectoryEntry]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .map(|e| e.id.as_str())
        .find(|id| !seen.insert(*id))
}

#[async_trait]
impl DirectoryReader for InMemoryDirectory {
    async fn list_entries(&self, admin_only: bool) -> std::result::Result<Vec<DirectoryEntry>, DirectoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| !admin_only || e.admin)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TokenDirectory for InMemoryDirectory {
    async fn remove_token(&self, entry_id: &str, token: &str) -> std::result::Result<(), DirectoryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| DirectoryError::NotFound(entry_id.to_string()))?;

        let before = entry.tokens.len();
        entry.tokens.retain(|t| t != token);
        debug!(
            "[DIRECTORY] remove_token entry={} removed={}",
            entry_id,
            before - entry.tokens.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_entries_admin_filter() {
        let dir = InMemoryDirectory::from_entries(vec![
            DirectoryEntry::new("u1", tokens(&["x"]), false),
            DirectoryEntry::new("u2", tokens(&["y"]), true),
        ]);

        assert_eq!(dir.list_entries(false).await.unwrap().len(), 2);
        let admins = dir.list_entries(true).await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].id, "u2");
    }

    #[tokio::test]
    async fn test_remove_token_is_idempotent() {
        let dir = InMemoryDirectory::from_entries(vec![DirectoryEntry::new(
            "u1",
            tokens(&["a", "b"]),
            false,
        )]);

        dir.remove_token("u1", "a").await.unwrap();
        assert_eq!(dir.get("u1").await.unwrap().tokens, tokens(&["b"]));

        // 再次移除不报错，列表不变
        dir.remove_token("u1", "a").await.unwrap();
        assert_eq!(dir.get("u1").await.unwrap().tokens, tokens(&["b"]));
    }

    #[tokio::test]
    async fn test_remove_token_unknown_entry() {
        let dir = InMemoryDirectory::new();
        let err = dir.remove_token("ghost", "a").await.unwrap_err();
        assert_eq!(err, DirectoryError::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_entries_containing() {
        let dir = InMemoryDirectory::from_entries(vec![
            DirectoryEntry::new("u1", tokens(&["z", "a"]), false),
            DirectoryEntry::new("u2", tokens(&["b"]), true),
            DirectoryEntry::new("u3", tokens(&["z"]), true),
        ]);

        let ids = dir.entries_containing("z").await.unwrap();
        assert_eq!(ids, vec!["u1".to_string(), "u3".to_string()]);
        assert!(dir.entries_containing("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let dir = InMemoryDirectory::new();
        dir.upsert(DirectoryEntry::new("u1", tokens(&["a"]), false)).await;
        dir.upsert(DirectoryEntry::new("u1", tokens(&["b"]), true)).await;

        let snapshot = dir.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].tokens, tokens(&["b"]));
        assert!(snapshot[0].admin);
    }

    #[tokio::test]
    async fn test_from_json_file_defaults_admin_to_false() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"u1","tokens":["a"]}},{{"id":"u2","tokens":["b"],"admin":true,"displayName":"Ops"}}]"#
        )
        .unwrap();

        let dir = InMemoryDirectory::from_json_file(file.path()).unwrap();
        let entries = dir.snapshot().await;
        assert!(!entries[0].admin);
        assert!(entries[1].admin);
        assert_eq!(entries[1].label(), "Ops");
    }

    #[test]
    fn test_from_json_file_rejects_duplicate_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id":"u1"}},{{"id":"u1"}}]"#).unwrap();
        assert!(InMemoryDirectory::from_json_file(file.path()).is_err());
    }
}
