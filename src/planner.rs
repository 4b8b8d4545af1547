//! 分片规划
//!
//! 把有序的条目列表切成固定大小的连续分片。纯函数，同样的输入总是得到同样的划分，
//! 检查点文件按分片序号命名，依赖这一点在重启后继续有效。

use crate::models::{Shard, WorkItem};

/// 将条目切分为分片
///
/// 第 i 个分片包含 `items[i*shard_size .. min((i+1)*shard_size, len)]`，不打乱顺序。
/// `shard_size` 为 0 时按 1 处理。
pub fn create_shards(items: &[WorkItem], shard_size: usize) -> Vec<Shard> {
    let shard_size = shard_size.max(1);
    items
        .chunks(shard_size)
        .enumerate()
        .map(|(index, chunk)| Shard::new(index, chunk.to_vec()))
        .collect()
}
