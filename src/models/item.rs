//! 工作条目
//!
//! 核心只关心条目的 `id`，其余字段原样交给执行器

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt::Display;

/// 单个待处理条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// 条目ID（用于日志、错误记录和报告）
    pub id: String,

    /// 交给执行器的其余字段
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

impl WorkItem {
    /// 创建只有 ID 的条目
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Map::new(),
        }
    }

    /// 附加一个字段
    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

impl Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[条目 #{}]", self.id)
    }
}
