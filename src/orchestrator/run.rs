//! 批处理运行器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责一次完整运行的资源和流程：
//!
//! 1. **应用初始化**：校验配置、初始化日志文件、创建检查点存储
//! 2. **分片规划**：把条目切成固定大小的分片
//! 3. **并发执行**：交给 `ConcurrencyController` 处理第一轮
//! 4. **分片重试**：第一轮结束后由 `RetryCoordinator` 重试失败分片
//! 5. **最终报告**：汇总分片状态，写入报告文件并打印统计
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有检查点存储、熔断器和报告任务的模块
//! - **不处理条目**：条目执行委托给 `ShardProcessor`（同进程）或工作进程

use crate::config::{Config, IsolationMode};
use crate::error::{AppError, AppResult};
use crate::infrastructure::{CheckpointStore, CircuitBreaker, FileCheckpointStore, GlobalSnapshot, ShardSnapshot};
use crate::models::{RunReport, WorkItem};
use crate::orchestrator::controller::ConcurrencyController;
use crate::orchestrator::isolation::ProcessRunner;
use crate::orchestrator::retry::RetryCoordinator;
use crate::orchestrator::runner::{InProcessRunner, ShardRunner};
use crate::planner;
use crate::services::events::{FanoutSink, ProgressSink};
use crate::services::reporter::Reporter;
use crate::utils::logging;
use crate::workflow::{ProcessorSettings, ShardProcessor, WorkflowExecutor};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// 应用主结构
pub struct Orchestrator {
    config: Config,
    store: Arc<dyn CheckpointStore>,
    breaker: Arc<CircuitBreaker>,
    observers: Vec<Arc<dyn ProgressSink>>,
}

impl Orchestrator {
    /// 初始化应用
    pub async fn initialize(config: Config) -> AppResult<Self> {
        config.validate()?;

        // 初始化日志文件
        logging::init_log_file(&config.output_log_file)
            .map_err(|e| AppError::startup(format!("无法创建日志文件 {}: {}", config.output_log_file, e)))?;

        logging::log_startup(&config);

        let store = FileCheckpointStore::create(&config.checkpoint_dir).await?;
        Self::with_store(config, Arc::new(store))
    }

    /// 使用指定的检查点存储创建
    pub fn with_store(config: Config, store: Arc<dyn CheckpointStore>) -> AppResult<Self> {
        config.validate()?;
        let breaker = Arc::new(CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown()));

        Ok(Self {
            config,
            store,
            breaker,
            observers: Vec::new(),
        })
    }

    /// 额外订阅进度事件
    pub fn with_observer(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.observers.push(sink);
        self
    }

    /// 运行应用主逻辑
    ///
    /// 只有启动阶段的错误会返回 `Err`；条目和分片的失败都记录在报告中。
    pub async fn run(&self, items: Vec<WorkItem>, executor: Arc<dyn WorkflowExecutor>) -> AppResult<RunReport> {
        let started_at = Utc::now();

        let mut shards = planner::create_shards(&items, self.config.shard_size);
        for shard in &mut shards {
            shard.checkpoint_path = self.store.location(&shard.id);
        }

        if shards.is_empty() {
            warn!("⚠️ 没有待处理的条目");
        }
        logging::log_plan(items.len(), shards.len(), self.config.max_concurrent);

        // 启动报告任务
        let reporter = Reporter::new(&shards, self.breaker.clone(), self.store.clone());
        let (reporter, events) = reporter.spawn(self.config.report_interval());

        let mut sinks: Vec<Arc<dyn ProgressSink>> = vec![Arc::new(events)];
        sinks.extend(self.observers.iter().cloned());
        let sink: Arc<dyn ProgressSink> = Arc::new(FanoutSink::new(sinks));

        let runner = self.build_runner(executor, sink.clone())?;
        let controller = ConcurrencyController::new(self.config.max_concurrent, runner, self.breaker.clone(), sink);

        // 第一轮
        logging::log_pass_start("第一轮", shards.len());
        let first = controller.run_pass(shards).await;

        // 重试
        let outcome = if first.halted.is_some() {
            warn!("⛔ 运行已停止，跳过重试");
            first
        } else {
            RetryCoordinator::new(self.config.max_retries)
                .run(&controller, first.shards)
                .await
        };

        let reporter = reporter
            .finish()
            .await
            .map_err(|e| AppError::Other(format!("报告任务异常退出: {}", e)))?;

        let report = RunReport::from_shards(
            &outcome.shards,
            started_at,
            Utc::now(),
            self.store.root(),
            outcome.halted.map(|e| e.to_string()),
        );

        // 最终计数以分片为准
        let mut stats = reporter.stats().clone();
        stats.processed = report.summary.processed;
        stats.failed = report.summary.failed;
        let snapshot = GlobalSnapshot::new(&stats, outcome.shards.iter().map(ShardSnapshot::from).collect());

        if let Err(e) = self.store.save_global_snapshot(&snapshot).await {
            warn!("⚠️ 全局快照写入失败: {}", e);
        }
        if let Err(e) = self.store.save_report(&report).await {
            warn!("⚠️ 最终报告写入失败: {}", e);
        }

        logging::print_final_summary(&report, &self.config.output_log_file);

        Ok(report)
    }

    /// 按隔离模式选择执行策略
    fn build_runner(
        &self,
        executor: Arc<dyn WorkflowExecutor>,
        sink: Arc<dyn ProgressSink>,
    ) -> AppResult<Arc<dyn ShardRunner>> {
        match self.config.isolation_mode {
            IsolationMode::Thread => {
                let processor = ShardProcessor::new(
                    self.store.clone(),
                    self.breaker.clone(),
                    sink,
                    ProcessorSettings::from(&self.config),
                );
                Ok(Arc::new(InProcessRunner::new(processor, executor)))
            }
            IsolationMode::Process => {
                let program = match &self.config.worker_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()
                        .map_err(|e| AppError::startup(format!("无法确定工作进程程序: {}", e)))?,
                };
                info!(
                    "🧩 进程隔离模式: 工作进程 {}，条目命令由工作进程执行",
                    program.display()
                );
                Ok(Arc::new(ProcessRunner::new(
                    program,
                    self.config.clone(),
                    self.breaker.clone(),
                    sink,
                )))
            }
        }
    }
}
