use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 分片级错误
    #[error("分片错误: {0}")]
    Shard(#[from] ShardError),
    /// 检查点读写错误
    #[error("检查点错误: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 启动阶段不可恢复的错误（例如检查点目录无法创建）
    #[error("启动失败: {0}")]
    Startup(String),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 单个条目的错误种类
///
/// 条目级错误只记录在分片上，从不向上传播。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// 超过 `timeout_ms` 未返回
    Timeout,
    /// 执行器返回了错误
    Execution,
}

impl ItemErrorKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ItemErrorKind::Timeout => "ItemTimeoutError",
            ItemErrorKind::Execution => "ItemExecutionError",
        }
    }
}

/// 分片级错误
///
/// 只有这些错误会离开 `ShardProcessor`，由并发控制器捕获并记录。
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardError {
    /// 累计错误率超过阈值，分片提前终止
    #[error("分片 {shard_id} 错误率 {error_count}/{total} 超过阈值 {threshold}")]
    Abort {
        shard_id: String,
        error_count: usize,
        total: usize,
        threshold: f64,
    },
    /// fail_fast 策略下检查点写入失败
    #[error("分片 {shard_id} 检查点写入失败: {message}")]
    CheckpointIo { shard_id: String, message: String },
    /// 进程隔离模式下子进程非零退出
    #[error("分片 {shard_id} 的工作进程异常退出 (退出码: {code:?})")]
    WorkerCrash { shard_id: String, code: Option<i32> },
    /// 与工作进程通信失败
    #[error("分片 {shard_id} 的工作进程通信失败: {message}")]
    Worker { shard_id: String, message: String },
}

impl ShardError {
    pub fn shard_id(&self) -> &str {
        match self {
            ShardError::Abort { shard_id, .. }
            | ShardError::CheckpointIo { shard_id, .. }
            | ShardError::WorkerCrash { shard_id, .. }
            | ShardError::Worker { shard_id, .. } => shard_id,
        }
    }

    /// 是否需要停止派发新的分片
    pub fn halts_run(&self) -> bool {
        matches!(self, ShardError::CheckpointIo { .. })
    }
}

/// 检查点读写错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 文件读写失败
    #[error("检查点文件读写失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 序列化失败
    #[error("检查点序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取或解析失败
    #[error("无法加载配置文件 {path}: {message}")]
    FileLoad { path: String, message: String },
    /// 配置项取值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: String, reason: String },
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Checkpoint(CheckpointError::Serialize(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建启动失败错误
    pub fn startup(message: impl Into<String>) -> Self {
        AppError::Startup(message.into())
    }
}

impl CheckpointError {
    /// 创建文件读写错误
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

impl ConfigError {
    /// 创建配置项非法错误
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_checkpoint_failures_halt_the_run() {
        let abort = ShardError::Abort {
            shard_id: "shard_0".to_string(),
            error_count: 11,
            total: 50,
            threshold: 0.2,
        };
        let io = ShardError::CheckpointIo {
            shard_id: "shard_1".to_string(),
            message: "磁盘已满".to_string(),
        };

        assert!(!abort.halts_run());
        assert!(io.halts_run());
        assert_eq!(io.shard_id(), "shard_1");
    }

    #[test]
    fn test_item_error_tags() {
        assert_eq!(ItemErrorKind::Timeout.tag(), "ItemTimeoutError");
        assert_eq!(ItemErrorKind::Execution.tag(), "ItemExecutionError");
    }
}
