//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use crate::config::Config;
use crate::models::RunReport;
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化 tracing
///
/// 日志写到 stderr，stdout 留给工作进程协议使用。级别由 `RUST_LOG` 控制，默认 info。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n分片批处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 分片批处理模式 ({})", config.isolation_mode.as_str());
    info!(
        "📊 分片大小: {} | 最大并发: {} | 最大重试: {}",
        config.shard_size, config.max_concurrent, config.max_retries
    );
    info!(
        "🛡️ 错误阈值: {:.0}% | 条目超时: {}ms | 熔断: {} 次 / {}ms",
        config.error_threshold * 100.0,
        config.timeout_ms,
        config.breaker_threshold,
        config.breaker_cooldown_ms
    );
    info!("💾 检查点目录: {}", config.checkpoint_dir.display());
    info!("{}", "=".repeat(60));
}

/// 记录分片规划结果
///
/// # 参数
/// - `items`: 条目总数
/// - `shards`: 分片数量
/// - `max_concurrent`: 最大并发数
pub fn log_plan(items: usize, shards: usize, max_concurrent: usize) {
    info!("✓ 共 {} 个条目，划分为 {} 个分片", items, shards);
    info!("📋 最多同时处理 {} 个分片\n", max_concurrent);
}

/// 记录一轮处理的开始
///
/// # 参数
/// - `label`: 本轮名称
/// - `shards`: 本轮分片数量
pub fn log_pass_start(label: &str, shards: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 {}: {} 个分片", label, shards);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息，并追加到日志文件
///
/// # 参数
/// - `report`: 最终报告
/// - `log_file_path`: 日志文件路径
pub fn print_final_summary(report: &RunReport, log_file_path: &str) {
    let summary = &report.summary;
    let mut lines = vec![
        "=".repeat(60),
        "📊 全部处理完成统计".to_string(),
        format!("完成时间: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
        "=".repeat(60),
        format!("✅ 成功: {}/{}", summary.processed, summary.total),
        format!("❌ 失败: {}", summary.failed),
        format!("⏱️ 耗时: {:.2}s", summary.duration),
    ];

    if !report.failed_shards.is_empty() {
        lines.push(format!("⚠️ 失败分片: {}", report.failed_shards.join(", ")));
    }
    if let Some(reason) = &report.halted {
        lines.push(format!("⛔ 提前停止: {}", reason));
    }
    lines.push(format!("💾 检查点位置: {}", report.checkpoint_location));
    lines.push("=".repeat(60));

    info!("");
    for line in &lines {
        info!("{}", line);
    }
    info!("\n日志已保存至: {}", log_file_path);

    if let Err(e) = append_to_log_file(log_file_path, &lines) {
        warn!("⚠️ 无法写入日志文件 {}: {}", log_file_path, e);
    }
}

fn append_to_log_file(log_file_path: &str, lines: &[String]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
