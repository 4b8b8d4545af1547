//! 工作流执行器 - 流程层
//!
//! 执行器是调用方提供的单条目操作，对核心来说是不透明的：
//! 成功返回 `Ok(())`，失败返回错误。同一条目在一次处理轮次中最多调用一次。

use crate::models::WorkItem;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// 单条目执行器
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> Result<()>;
}

/// 用闭包实现的执行器
pub struct FnExecutor<F> {
    f: F,
}

/// 把 `Fn(WorkItem) -> Future` 包装为执行器
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> WorkflowExecutor for FnExecutor<F>
where
    F: Fn(WorkItem) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn execute(&self, item: &WorkItem) -> Result<()> {
        (self.f)(item.clone()).await
    }
}

/// 通过 `sh -c` 执行命令的执行器
///
/// 条目 JSON 写入命令的标准输入，`ITEM_ID` 环境变量为条目ID；非零退出视为失败。
/// 超时时子进程随 future 一起被丢弃并终止。
pub struct CommandExecutor {
    command: String,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl WorkflowExecutor for CommandExecutor {
    async fn execute(&self, item: &WorkItem) -> Result<()> {
        let input = serde_json::to_vec(item)?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("ITEM_ID", &item.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("无法启动命令: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // 命令可能不读标准输入，写入失败不算条目失败
            if let Err(e) = stdin.write_all(&input).await {
                debug!("{} 写入标准输入失败: {}", item, e);
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "命令退出码 {:?}: {}",
            output.status.code(),
            crate::utils::logging::truncate_text(stderr.trim(), 200)
        )
    }
}
