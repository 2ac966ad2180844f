//! 目标 token 解析
//!
//! 策略（按顺序）：
//! 1. 请求显式指定了 `tokens` 时直接使用（去重），不访问目录；清洗后为空则没有目标；
//! 2. 否则读取目录条目，`admin_only` 时只保留管理员，展开并跨条目去重；
//! 3. 结果为空不是错误。

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::push::types::NotificationRequest;
use crate::repository::{DirectoryEntry, DirectoryReader};

/// 解析一条请求的目标 token（保持首次出现的顺序）
pub async fn resolve<D>(
    req: &NotificationRequest,
    directory: &D,
    admin_only: bool,
) -> Result<Vec<String>, ResolveError>
where
    D: DirectoryReader + ?Sized,
{
    if let Some(tokens) = req.inline_tokens() {
        if tokens.is_empty() {
            warn!("[RESOLVER] Message named tokens but none were usable, nothing to send");
            return Ok(Vec::new());
        }
        let targets = dedup(tokens.iter().map(String::as_str));
        debug!(
            "[RESOLVER] Using {} inline tokens ({} distinct)",
            tokens.len(),
            targets.len()
        );
        return Ok(targets);
    }

    let entries = directory.list_entries(admin_only).await?;
    let targets = collect_tokens(&entries, admin_only);
    info!(
        "[RESOLVER] Resolved {} tokens from {} directory entries (admin_only={})",
        targets.len(),
        entries.len(),
        admin_only
    );
    Ok(targets)
}

/// 过滤、展开、去重；纯函数
///
/// 目录实现可能已经按 `admin_only` 过滤过，这里再过滤一次以保证语义。
pub fn collect_tokens(entries: &[DirectoryEntry], admin_only: bool) -> Vec<String> {
    dedup(
        entries
            .iter()
            .filter(|entry| {
                if admin_only && !entry.admin {
                    debug!("[RESOLVER] Skipped non-admin entry: {}", entry.label());
                    return false;
                }
                true
            })
            .flat_map(|entry| entry.tokens.iter().map(String::as_str)),
    )
}

fn dedup<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .filter(|token| !token.is_empty())
        .filter(|token| seen.insert(*token))
        .map(str::to_string)
        .collect()
}
