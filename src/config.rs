use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 分片执行方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// 同一进程内的并发任务
    Thread,
    /// 每个分片一个子进程
    Process,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Thread => "thread",
            IsolationMode::Process => "process",
        }
    }
}

impl FromStr for IsolationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(IsolationMode::Thread),
            "process" => Ok(IsolationMode::Process),
            other => Err(ConfigError::EnvVarParseFailed {
                var_name: "ISOLATION_MODE".to_string(),
                value: other.to_string(),
                expected_type: "thread | process".to_string(),
            }),
        }
    }
}

/// 检查点写入失败时的处理策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFailurePolicy {
    /// 记录日志后继续处理，丢失该区间的可恢复性
    BestEffort,
    /// 终止当前分片并停止派发新分片
    FailFast,
}

impl FromStr for CheckpointFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(CheckpointFailurePolicy::BestEffort),
            "fail_fast" | "fail-fast" => Ok(CheckpointFailurePolicy::FailFast),
            other => Err(ConfigError::EnvVarParseFailed {
                var_name: "CHECKPOINT_FAILURE_POLICY".to_string(),
                value: other.to_string(),
                expected_type: "best_effort | fail_fast".to_string(),
            }),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 每个分片的条目数
    pub shard_size: usize,
    /// 同时运行的分片数量
    pub max_concurrent: usize,
    /// 每成功多少个条目写一次检查点
    pub checkpoint_interval: usize,
    /// 分片级重试次数上限
    pub max_retries: u32,
    /// 分片内允许失败的条目比例
    pub error_threshold: f64,
    /// 单个条目的硬超时（毫秒）
    pub timeout_ms: u64,
    pub isolation_mode: IsolationMode,
    /// 检查点目录
    pub checkpoint_dir: PathBuf,
    /// 连续失败多少次后熔断
    pub breaker_threshold: u32,
    /// 熔断冷却时间（毫秒）
    pub breaker_cooldown_ms: u64,
    /// 进度报告间隔（毫秒）
    pub report_interval_ms: u64,
    pub checkpoint_failure_policy: CheckpointFailurePolicy,
    /// 命令执行器使用的 shell 命令
    pub item_command: String,
    /// 进程隔离模式下的工作进程可执行文件，默认为当前程序
    pub worker_program: Option<PathBuf>,
    /// 运行日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_size: 50,
            max_concurrent: 3,
            checkpoint_interval: 10,
            max_retries: 3,
            error_threshold: 0.2,
            timeout_ms: 300_000,
            isolation_mode: IsolationMode::Thread,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            breaker_threshold: 5,
            breaker_cooldown_ms: 60_000,
            report_interval_ms: 5_000,
            checkpoint_failure_policy: CheckpointFailurePolicy::BestEffort,
            item_command: "true".to_string(),
            worker_program: None,
            output_log_file: "output.txt".to_string(),
        }
    }
}

impl Config {
    /// 从环境变量读取配置，缺失或无法解析的项使用默认值
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 先读取 `SHARD_RUNNER_CONFIG` 指向的 TOML 文件（如果有），再叠加环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("SHARD_RUNNER_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?.with_env_overrides(),
            Err(_) => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::FileLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn with_env_overrides(self) -> Self {
        Self {
            shard_size: env_or("SHARD_SIZE", self.shard_size),
            max_concurrent: env_or("MAX_CONCURRENT", self.max_concurrent),
            checkpoint_interval: env_or("CHECKPOINT_INTERVAL", self.checkpoint_interval),
            max_retries: env_or("MAX_RETRIES", self.max_retries),
            error_threshold: env_or("ERROR_THRESHOLD", self.error_threshold),
            timeout_ms: env_or("TIMEOUT_MS", self.timeout_ms),
            isolation_mode: env_or("ISOLATION_MODE", self.isolation_mode),
            checkpoint_dir: std::env::var("CHECKPOINT_DIR").map(PathBuf::from).unwrap_or(self.checkpoint_dir),
            breaker_threshold: env_or("BREAKER_THRESHOLD", self.breaker_threshold),
            breaker_cooldown_ms: env_or("BREAKER_COOLDOWN_MS", self.breaker_cooldown_ms),
            report_interval_ms: env_or("REPORT_INTERVAL_MS", self.report_interval_ms),
            checkpoint_failure_policy: env_or("CHECKPOINT_FAILURE_POLICY", self.checkpoint_failure_policy),
            item_command: std::env::var("ITEM_COMMAND").unwrap_or(self.item_command),
            worker_program: std::env::var("WORKER_PROGRAM").ok().map(PathBuf::from).or(self.worker_program),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
        }
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_size == 0 {
            return Err(ConfigError::invalid("shard_size", "必须大于 0"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent", "必须大于 0"));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::invalid("checkpoint_interval", "必须大于 0"));
        }
        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(ConfigError::invalid("error_threshold", "必须位于 [0, 1] 区间"));
        }
        if self.breaker_threshold == 0 {
            return Err(ConfigError::invalid("breaker_threshold", "必须大于 0"));
        }
        Ok(())
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

fn env_or<T: FromStr>(var_name: &str, default: T) -> T {
    std::env::var(var_name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
