//! 检查点存储 - 基础设施层
//!
//! 每个分片独占一个检查点位置，只在分片开始时读取一次；
//! 全局快照只供外部查看和崩溃诊断，从不回读用于恢复。

use crate::error::{AppError, AppResult, CheckpointError};
use crate::models::{Checkpoint, GlobalStats, RunReport, Shard, ShardStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const GLOBAL_SNAPSHOT_FILE: &str = "global_snapshot.json";
const REPORT_FILE: &str = "report.json";

/// 全局快照中的单个分片视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSnapshot {
    pub id: String,
    pub status: ShardStatus,
    pub progress: f64,
    pub processed_count: usize,
    pub error_count: usize,
}

impl From<&Shard> for ShardSnapshot {
    fn from(shard: &Shard) -> Self {
        Self {
            id: shard.id.clone(),
            status: shard.status,
            progress: shard.progress,
            processed_count: shard.processed_count,
            error_count: shard.error_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// 全局快照（仅供参考）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub timestamp: DateTime<Utc>,
    pub stats: SnapshotStats,
    pub shards: Vec<ShardSnapshot>,
}

impl GlobalSnapshot {
    pub fn new(stats: &GlobalStats, shards: Vec<ShardSnapshot>) -> Self {
        Self {
            timestamp: Utc::now(),
            stats: SnapshotStats {
                total: stats.total,
                processed: stats.processed,
                failed: stats.failed,
            },
            shards,
        }
    }
}

/// 检查点存储
///
/// 后端可以是文件、内存或其他服务，分片处理逻辑只依赖这个接口。
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 保存分片检查点
    async fn save(&self, shard: &Shard, last_processed_index: usize) -> Result<Checkpoint, CheckpointError>;

    /// 读取分片检查点，不存在或无法读取时返回 None
    async fn load(&self, shard_id: &str) -> Option<Checkpoint>;

    /// 保存全局快照
    async fn save_global_snapshot(&self, snapshot: &GlobalSnapshot) -> Result<(), CheckpointError>;

    /// 保存最终报告
    async fn save_report(&self, report: &RunReport) -> Result<(), CheckpointError>;

    /// 分片检查点的位置
    fn location(&self, shard_id: &str) -> Option<PathBuf>;

    /// 检查点根位置（写入最终报告）
    fn root(&self) -> String;
}

/// 基于 JSON 文件的检查点存储
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// 创建存储并确保目录存在
    ///
    /// 目录无法创建属于启动失败，必须在任何分片开始前报告给调用方。
    pub async fn create(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::startup(format!("无法创建检查点目录 {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    fn checkpoint_path(&self, shard_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", shard_id))
    }

    /// 先写临时文件再重命名，避免留下写了一半的检查点
    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), CheckpointError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| CheckpointError::io(tmp.display().to_string(), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| CheckpointError::io(path.display().to_string(), e))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, shard: &Shard, last_processed_index: usize) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = Checkpoint::from_shard(shard, last_processed_index);
        let bytes = serde_json::to_vec_pretty(&checkpoint)?;
        self.write_atomic(&self.checkpoint_path(&shard.id), bytes).await?;
        debug!("[{}] 检查点已保存: lastProcessedIndex={}", shard.id, last_processed_index);
        Ok(checkpoint)
    }

    async fn load(&self, shard_id: &str) -> Option<Checkpoint> {
        let path = self.checkpoint_path(shard_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("⚠️ 无法读取检查点 {}: {}，从头开始", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) if checkpoint.shard_id == shard_id => Some(checkpoint),
            Ok(checkpoint) => {
                warn!(
                    "⚠️ 检查点 {} 属于分片 {}，与 {} 不符，忽略",
                    path.display(),
                    checkpoint.shard_id,
                    shard_id
                );
                None
            }
            Err(e) => {
                warn!("⚠️ 检查点 {} 已损坏: {}，从头开始", path.display(), e);
                None
            }
        }
    }

    async fn save_global_snapshot(&self, snapshot: &GlobalSnapshot) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        self.write_atomic(&self.dir.join(GLOBAL_SNAPSHOT_FILE), bytes).await
    }

    async fn save_report(&self, report: &RunReport) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(report)?;
        self.write_atomic(&self.dir.join(REPORT_FILE), bytes).await
    }

    fn location(&self, shard_id: &str) -> Option<PathBuf> {
        Some(self.checkpoint_path(shard_id))
    }

    fn root(&self) -> String {
        self.dir.display().to_string()
    }
}

/// 内存检查点存储，用于测试和不需要跨进程恢复的场景
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    snapshot: RwLock<Option<GlobalSnapshot>>,
    report: RwLock<Option<RunReport>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一个检查点（模拟上一次运行留下的进度）
    pub async fn insert(&self, checkpoint: Checkpoint) {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.shard_id.clone(), checkpoint);
    }

    pub async fn last_snapshot(&self) -> Option<GlobalSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.report.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, shard: &Shard, last_processed_index: usize) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = Checkpoint::from_shard(shard, last_processed_index);
        self.insert(checkpoint.clone()).await;
        Ok(checkpoint)
    }

    async fn load(&self, shard_id: &str) -> Option<Checkpoint> {
        self.checkpoints.read().await.get(shard_id).cloned()
    }

    async fn save_global_snapshot(&self, snapshot: &GlobalSnapshot) -> Result<(), CheckpointError> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn save_report(&self, report: &RunReport) -> Result<(), CheckpointError> {
        *self.report.write().await = Some(report.clone());
        Ok(())
    }

    fn location(&self, _shard_id: &str) -> Option<PathBuf> {
        None
    }

    fn root(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;

    fn shard() -> Shard {
        Shard::new(3, (0..10).map(|i| WorkItem::new(format!("i{}", i))).collect())
    }

    #[tokio::test]
    async fn test_file_store_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::create(dir.path().join("cp")).await.unwrap();

        let mut shard = shard();
        shard.processed_count = 4;
        shard.update_progress(4);
        store.save(&shard, 4).await.unwrap();

        let loaded = store.load("shard_3").await.unwrap();
        assert_eq!(loaded.last_processed_index, 4);
        assert_eq!(loaded.processed_count, 4);
        assert_eq!(loaded.progress, 40.0);
        assert_eq!(
            store.location("shard_3").unwrap(),
            dir.path().join("cp").join("shard_3.json")
        );
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::create(dir.path()).await.unwrap();

        assert!(store.load("shard_0").await.is_none());

        std::fs::write(dir.path().join("shard_0.json"), "{ not json").unwrap();
        assert!(store.load("shard_0").await.is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_for_other_shard_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::create(dir.path()).await.unwrap();
        store.save(&shard(), 2).await.unwrap();

        std::fs::copy(dir.path().join("shard_3.json"), dir.path().join("shard_4.json")).unwrap();
        assert!(store.load("shard_4").await.is_none());
    }

    #[tokio::test]
    async fn test_global_snapshot_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::create(dir.path()).await.unwrap();

        let mut stats = GlobalStats::new(10);
        stats.processed = 7;
        stats.failed = 1;
        let snapshot = GlobalSnapshot::new(&stats, vec![ShardSnapshot::from(&shard())]);
        store.save_global_snapshot(&snapshot).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(GLOBAL_SNAPSHOT_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["stats"]["processed"], 7);
        assert_eq!(value["shards"][0]["id"], "shard_3");
        assert_eq!(value["shards"][0]["status"], "pending");
        assert_eq!(value["shards"][0]["processedCount"], 0);
    }

    #[tokio::test]
    async fn test_unusable_directory_fails_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let result = FileCheckpointStore::create(blocker.join("cp")).await;
        assert!(matches!(result, Err(AppError::Startup(_))));
    }
}
