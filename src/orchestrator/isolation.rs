//! 进程隔离执行
//!
//! 每个分片在独立的子进程中运行，子进程崩溃不会破坏共享状态，也不会拖垮其他分片。
//!
//! 通信协议为按行分隔的 JSON：
//!
//! ```text
//! 父进程 → 子进程:  WorkerRequest { shard, config }   （第一行）
//!                   PROCEED                           （回应 ADMIT）
//! 子进程 → 父进程:  ADMIT | PROGRESS | ERROR | CHECKPOINT | COMPLETE
//! ```
//!
//! 熔断器和全局统计只存在于父进程：子进程在每个条目前发送 `ADMIT` 并等待放行，
//! 父进程根据 `PROGRESS`/`ERROR` 更新熔断器。子进程的日志写到 stderr，stdout 只用于协议。

use crate::config::Config;
use crate::error::ShardError;
use crate::infrastructure::{AdmissionGate, CheckpointStore, CircuitBreaker, FileCheckpointStore};
use crate::models::{ItemErrorRecord, Shard, ShardStatus};
use crate::orchestrator::runner::{ShardRun, ShardRunner};
use crate::services::events::{ProgressEvent, ProgressSink};
use crate::workflow::{ProcessorSettings, ShardProcessor, WorkflowExecutor};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::process::{ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 启动工作进程时使用的命令行参数
pub const WORKER_ARG: &str = "worker";

/// 父进程发给子进程的第一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub shard: Shard,
    pub config: Config,
}

/// 子进程发给父进程的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// 请求尝试下一个条目
    Admit,
    /// 条目成功
    Progress {
        item_id: String,
        processed_count: usize,
        progress: f64,
    },
    /// 条目失败
    Error {
        error: ItemErrorRecord,
        error_count: usize,
        progress: f64,
    },
    Checkpoint { last_processed_index: usize },
    /// 分片处理结束，带回最终分片状态
    Complete {
        shard: Shard,
        error: Option<ShardError>,
    },
}

/// 父进程发给子进程的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentMessage {
    Proceed,
}

// ========== 父进程侧 ==========

/// 进程隔离执行策略
pub struct ProcessRunner {
    program: PathBuf,
    config: Config,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn ProgressSink>,
}

impl ProcessRunner {
    pub fn new(program: PathBuf, config: Config, breaker: Arc<CircuitBreaker>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            program,
            config,
            breaker,
            sink,
        }
    }

    /// 启动子进程并转发消息，直到子进程退出
    async fn supervise(&self, shard: &mut Shard) -> Result<(), ShardError> {
        let shard_id = shard.id.clone();
        let worker_err = |message: String| ShardError::Worker {
            shard_id: shard_id.clone(),
            message,
        };

        let mut child = Command::new(&self.program)
            .arg(WORKER_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| worker_err(format!("无法启动工作进程 {}: {}", self.program.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| worker_err("无法获取工作进程标准输入".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| worker_err("无法获取工作进程标准输出".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let request = WorkerRequest {
            shard: shard.clone(),
            config: self.config.clone(),
        };
        send_line(&mut stdin, &request)
            .await
            .map_err(|e| worker_err(format!("无法发送分片: {}", e)))?;

        debug!("[分片 {}] 工作进程已启动: pid={:?}", shard.index, child.id());

        let mut completion: Option<Option<ShardError>> = None;
        let mut awaiting_outcome = false;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| worker_err(format!("读取工作进程输出失败: {}", e)))?
        {
            let message: WorkerMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => {
                    debug!("[分片 {}] 工作进程输出: {}", shard.index, line);
                    continue;
                }
            };

            match message {
                WorkerMessage::Admit => {
                    self.breaker.admit().await;
                    awaiting_outcome = true;
                    if send_line(&mut stdin, &ParentMessage::Proceed).await.is_err() {
                        break;
                    }
                }
                WorkerMessage::Progress {
                    item_id,
                    processed_count,
                    progress,
                } => {
                    awaiting_outcome = false;
                    self.breaker.record_success().await;
                    shard.processed_count = processed_count;
                    shard.progress = progress;
                    self.sink.emit(ProgressEvent::ItemSucceeded {
                        shard_id: shard.id.clone(),
                        item_id,
                        processed_count,
                        progress,
                    });
                }
                WorkerMessage::Error {
                    error,
                    error_count,
                    progress,
                } => {
                    awaiting_outcome = false;
                    self.breaker.record_failure().await;
                    shard.error_count = error_count;
                    shard.progress = progress;
                    shard.errors.push(error.clone());
                    self.sink.emit(ProgressEvent::ItemFailed {
                        shard_id: shard.id.clone(),
                        error,
                        error_count,
                        progress,
                    });
                }
                WorkerMessage::Checkpoint {
                    last_processed_index,
                } => {
                    self.sink.emit(ProgressEvent::CheckpointSaved {
                        shard_id: shard.id.clone(),
                        last_processed_index,
                    });
                }
                WorkerMessage::Complete { shard: done, error } => {
                    *shard = done;
                    completion = Some(error);
                }
            }
        }

        drop(stdin);
        let status = child
            .wait()
            .await
            .map_err(|e| worker_err(format!("等待工作进程退出失败: {}", e)))?;

        // 放行后没有收到结果，释放可能停在 HALF_OPEN 的试探名额
        if awaiting_outcome {
            self.breaker.record_failure().await;
        }

        if !status.success() {
            return Err(ShardError::WorkerCrash {
                shard_id: shard_id.clone(),
                code: status.code(),
            });
        }

        match completion {
            Some(None) => Ok(()),
            Some(Some(e)) => Err(e),
            None => Err(worker_err("工作进程退出前未报告结果".to_string())),
        }
    }
}

#[async_trait]
impl ShardRunner for ProcessRunner {
    async fn run(&self, mut shard: Shard) -> ShardRun {
        let outcome = self.supervise(&mut shard).await;
        if outcome.is_err() {
            shard.status = ShardStatus::Failed;
            shard.end_time.get_or_insert_with(Utc::now);
        }
        ShardRun { shard, outcome }
    }
}

async fn send_line<T: Serialize>(stdin: &mut ChildStdin, message: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await
}

// ========== 子进程侧 ==========

/// 写协议消息到 stdout
struct WorkerOutput {
    stdout: std::io::Stdout,
}

impl WorkerOutput {
    fn new() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }

    fn send(&self, message: &WorkerMessage) -> std::io::Result<()> {
        let line = serde_json::to_string(message)?;
        let mut out = self.stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

/// 把准入请求转发给父进程的熔断器
struct ParentGate {
    shard_id: String,
    output: Arc<WorkerOutput>,
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl ParentGate {
    fn lost(&self, message: impl Into<String>) -> ShardError {
        ShardError::Worker {
            shard_id: self.shard_id.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl AdmissionGate for ParentGate {
    async fn admit(&self) -> Result<(), ShardError> {
        self.output
            .send(&WorkerMessage::Admit)
            .map_err(|e| self.lost(format!("无法联系父进程: {}", e)))?;

        let mut input = self.input.lock().await;
        match input.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<ParentMessage>(&line) {
                Ok(ParentMessage::Proceed) => Ok(()),
                Err(e) => Err(self.lost(format!("无法解析父进程消息: {}", e))),
            },
            Ok(None) => Err(self.lost("父进程已关闭输入")),
            Err(e) => Err(self.lost(format!("读取父进程消息失败: {}", e))),
        }
    }

    // 熔断器状态由父进程根据 PROGRESS / ERROR 更新
    async fn record_success(&self) {}

    async fn record_failure(&self) {}
}

/// 把进度事件翻译为协议消息
struct WorkerSink {
    output: Arc<WorkerOutput>,
}

impl ProgressSink for WorkerSink {
    fn emit(&self, event: ProgressEvent) {
        let message = match event {
            ProgressEvent::ItemSucceeded {
                item_id,
                processed_count,
                progress,
                ..
            } => WorkerMessage::Progress {
                item_id,
                processed_count,
                progress,
            },
            ProgressEvent::ItemFailed {
                error,
                error_count,
                progress,
                ..
            } => WorkerMessage::Error {
                error,
                error_count,
                progress,
            },
            ProgressEvent::CheckpointSaved {
                last_processed_index,
                ..
            } => WorkerMessage::Checkpoint {
                last_processed_index,
            },
            ProgressEvent::ShardStarted { .. } | ProgressEvent::ShardFinished { .. } => return,
        };

        if let Err(e) = self.output.send(&message) {
            warn!("⚠️ 无法向父进程发送消息: {}", e);
        }
    }
}

/// 工作进程入口
///
/// 从 stdin 读取分片，用 `build_executor` 根据配置构造执行器，处理完成后发送 `COMPLETE`。
/// 分片级错误通过 `COMPLETE` 报告，进程仍以 0 退出；非零退出只表示崩溃。
pub async fn run_worker<F>(build_executor: F) -> anyhow::Result<()>
where
    F: FnOnce(&Config) -> Arc<dyn WorkflowExecutor>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let first = lines
        .next_line()
        .await?
        .context("父进程没有发送分片")?;
    let WorkerRequest { mut shard, config } =
        serde_json::from_str(&first).context("无法解析分片请求")?;

    info!(
        "[分片 {}] 工作进程 {} 开始处理 {} 个条目",
        shard.index,
        std::process::id(),
        shard.len()
    );

    let output = Arc::new(WorkerOutput::new());
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::create(&config.checkpoint_dir).await?);
    let gate = Arc::new(ParentGate {
        shard_id: shard.id.clone(),
        output: output.clone(),
        input: Mutex::new(lines),
    });
    let sink = Arc::new(WorkerSink {
        output: output.clone(),
    });

    let processor = ShardProcessor::new(store, gate, sink, ProcessorSettings::from(&config));
    let executor = build_executor(&config);

    let result = processor.process(&mut shard, executor.as_ref()).await;
    output.send(&WorkerMessage::Complete {
        shard,
        error: result.err(),
    })?;

    Ok(())
}
