//! 进程级配置存储
//!
//! 宿主应用持有 `ProcessConfig`，同步引擎只持有它的一个克隆句柄并按键合并写入，
//! 从不整体替换。写入按键“后写者胜”，没有跨键事务。

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// 进程级可变键值配置
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    entries: Arc<DashMap<String, Value>>,
}

impl ProcessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从一组初始键值构建（通常是引导配置）
    pub fn from_map(map: Map<String, Value>) -> Self {
        let config = Self::new();
        for (key, value) in map {
            config.insert(key, value);
        }
        config
    }

    /// 读取某个键的当前值
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// 读取并反序列化为指定类型，类型不匹配时返回 None
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// 插入或覆盖，返回旧值
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 有序快照，便于比较和日志输出
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// 快照转换为 JSON 对象，用于反序列化引导配置
    pub fn to_object(&self) -> Value {
        Value::Object(self.snapshot().into_iter().collect())
    }
}
