use crate::models::item::WorkItem;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

/// 从 JSON 文件加载条目列表
///
/// 文件内容必须是对象数组，每个对象至少包含 `id` 字段；顺序即处理顺序。
pub async fn load_items_file(path: &Path) -> Result<Vec<WorkItem>> {
    if !path.exists() {
        anyhow::bail!("条目文件不存在: {}", path.display());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取条目文件: {}", path.display()))?;

    let items: Vec<WorkItem> = serde_json::from_str(&content)
        .with_context(|| format!("无法解析条目文件: {}", path.display()))?;

    let mut seen = HashSet::new();
    let duplicates = items.iter().filter(|item| !seen.insert(item.id.as_str())).count();
    if duplicates > 0 {
        tracing::warn!("⚠️ 条目文件中有 {} 个重复 ID，将按原顺序全部处理", duplicates);
    }

    tracing::info!("成功加载 {} 个条目", items.len());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_items_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, r#"[{"id":"b","n":1},{"id":"a"},{"id":"c"}]"#).unwrap();

        let items = load_items_file(&path).await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_items_file(&dir.path().join("nope.json")).await.is_err());
    }
}
