use anyhow::Result;
use batch_shard_runner::orchestrator::WORKER_ARG;
use batch_shard_runner::utils::logging;
use batch_shard_runner::{models, run_worker, CommandExecutor, Config, Orchestrator, WorkflowExecutor};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 工作进程模式：由父进程通过 stdin 下发分片
    if std::env::args().nth(1).as_deref() == Some(WORKER_ARG) {
        return run_worker(|config: &Config| -> Arc<dyn WorkflowExecutor> {
            Arc::new(CommandExecutor::new(config.item_command.clone()))
        })
        .await;
    }

    // 加载配置
    let config = Config::load()?;

    // 加载条目
    let items_file = std::env::var("ITEMS_FILE").unwrap_or_else(|_| "items.json".to_string());
    let items = models::load_items_file(Path::new(&items_file)).await?;

    let executor = Arc::new(CommandExecutor::new(config.item_command.clone()));

    // 初始化并运行应用
    Orchestrator::initialize(config).await?.run(items, executor).await?;

    Ok(())
}
