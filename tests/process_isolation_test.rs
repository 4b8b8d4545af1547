use batch_shard_runner::{executor_fn, Config, IsolationMode, Orchestrator, ShardStatus, WorkItem};
use std::path::PathBuf;
use std::sync::Arc;

fn items(n: usize) -> Vec<WorkItem> {
    (0..n).map(|i| WorkItem::new(format!("item-{}", i))).collect()
}

fn process_config(dir: &tempfile::TempDir, item_command: &str) -> Config {
    Config {
        shard_size: 5,
        max_concurrent: 2,
        max_retries: 0,
        checkpoint_interval: 2,
        isolation_mode: IsolationMode::Process,
        worker_program: Some(PathBuf::from(env!("CARGO_BIN_EXE_batch_shard_runner"))),
        item_command: item_command.to_string(),
        checkpoint_dir: dir.path().join("checkpoints"),
        output_log_file: dir.path().join("output.txt").display().to_string(),
        report_interval_ms: 50,
        timeout_ms: 10_000,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_workers_report_progress_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        error_threshold: 0.5,
        ..process_config(&dir, r#"case "$ITEM_ID" in item-3) exit 1 ;; esac"#)
    };
    let checkpoint_dir = config.checkpoint_dir.clone();

    let orchestrator = Orchestrator::initialize(config).await.unwrap();
    let unused = Arc::new(executor_fn(|_item: WorkItem| async { Ok(()) }));
    let report = orchestrator.run(items(10), unused).await.unwrap();

    assert_eq!(report.summary.total, 10);
    assert_eq!(report.summary.processed, 9);
    assert_eq!(report.summary.failed, 1);
    assert!(report.shards.iter().all(|s| s.status == ShardStatus::Completed));
    assert_eq!(report.failed_profiles.len(), 1);
    assert_eq!(report.failed_profiles[0].item_id, "item-3");

    // 检查点由工作进程写入
    assert!(checkpoint_dir.join("shard_0.json").exists());
    assert!(checkpoint_dir.join("shard_1.json").exists());
    assert!(checkpoint_dir.join("report.json").exists());
}

#[tokio::test]
async fn test_worker_crash_fails_only_its_shard() {
    let dir = tempfile::tempdir().unwrap();
    // 条目命令杀死所在的工作进程
    let config = process_config(&dir, r#"if [ "$ITEM_ID" = "item-2" ]; then kill -9 $PPID; fi"#);

    let orchestrator = Orchestrator::initialize(config).await.unwrap();
    let unused = Arc::new(executor_fn(|_item: WorkItem| async { Ok(()) }));
    let report = orchestrator.run(items(10), unused).await.unwrap();

    assert_eq!(report.shards[0].status, ShardStatus::Failed);
    assert_eq!(report.shards[1].status, ShardStatus::Completed);
    assert_eq!(report.failed_shards, vec!["shard_0".to_string()]);
    assert_eq!(report.shards[1].processed_count, 5);
}

#[tokio::test]
async fn test_retry_after_worker_crash_counts_each_item_once() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("crashed");
    // 只在第一次处理 item-3 时杀死工作进程
    let command = format!(
        r#"if [ "$ITEM_ID" = "item-3" ] && [ ! -e '{0}' ]; then touch '{0}'; kill -9 $PPID; fi"#,
        marker.display()
    );
    let config = Config {
        max_retries: 1,
        ..process_config(&dir, &command)
    };

    let orchestrator = Orchestrator::initialize(config).await.unwrap();
    let unused = Arc::new(executor_fn(|_item: WorkItem| async { Ok(()) }));
    let report = orchestrator.run(items(5), unused).await.unwrap();

    assert!(marker.exists());
    assert_eq!(report.shards[0].status, ShardStatus::Completed);
    assert_eq!(report.shards[0].retry_count, 1);
    assert_eq!(report.shards[0].processed_count, 5);
    assert_eq!(report.summary.processed, 5);
    assert_eq!(report.summary.total, 5);
    assert!(report.is_clean());
}
