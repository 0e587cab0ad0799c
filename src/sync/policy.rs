//! 配置合并策略
//!
//! 远端文档中的每个键：
//! - 全大写键为保留键（引导配置，建立注册中心连接之前就已设置），拒绝写入并告警
//! - 其他键一律插入或覆盖到进程配置，不关心旧值与类型
//!
//! 合并是按键 upsert：新文档中缺失的键保留旧值，不会清空进程配置。

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::ProcessConfig;
use crate::error::{NacosError, Result};
use crate::registry::ConfigKey;

/// 解析后的配置文档，每次拉取或推送都会重新构建
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub data_id: String,
    pub group: String,
    pub raw_content: String,
    pub parsed: Map<String, Value>,
}

impl ConfigDocument {
    /// 将 YAML 文本解析为键值映射
    ///
    /// 解析 `<<` 合并键；空文档视为空映射；顶层不是映射或顶层存在非字符串键时返回错误，
    /// 嵌套映射中的非字符串键转为字符串。
    pub fn parse(key: &ConfigKey, raw_content: impl Into<String>) -> Result<Self> {
        let raw_content = raw_content.into();
        let parsed = parse_mapping(&raw_content)?;
        Ok(Self {
            data_id: key.data_id.clone(),
            group: key.group.clone(),
            raw_content,
            parsed,
        })
    }

    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(self.data_id.clone(), self.group.clone())
    }
}

fn parse_mapping(raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    let mut document: serde_yaml::Value = serde_yaml::from_str(raw)?;
    document.apply_merge()?;
    let mapping = match document {
        serde_yaml::Value::Null => return Ok(Map::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        other => {
            return Err(NacosError::Document(format!(
                "top level must be a mapping, found {}",
                yaml_kind(&other)
            )));
        }
    };

    let mut parsed = Map::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(key) => key,
            other => {
                return Err(NacosError::Document(format!(
                    "keys must be strings, found {}",
                    yaml_kind(&other)
                )));
            }
        };
        let value = serde_json::to_value(stringify_keys(value)?)?;
        parsed.insert(key, value);
    }
    Ok(parsed)
}

/// 嵌套映射中的非字符串键转为字符串（`~` → "null"，`1` → "1"）
fn stringify_keys(value: serde_yaml::Value) -> Result<serde_yaml::Value> {
    Ok(match value {
        serde_yaml::Value::Mapping(mapping) => {
            let mut converted = serde_yaml::Mapping::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(key) => key,
                    serde_yaml::Value::Null => "null".to_string(),
                    serde_yaml::Value::Bool(flag) => flag.to_string(),
                    serde_yaml::Value::Number(number) => number.to_string(),
                    other => serde_yaml::to_string(&other)?.trim_end().to_string(),
                };
                converted.insert(serde_yaml::Value::String(key), stringify_keys(value)?);
            }
            serde_yaml::Value::Mapping(converted)
        }
        serde_yaml::Value::Sequence(items) => serde_yaml::Value::Sequence(
            items
                .into_iter()
                .map(stringify_keys)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Tagged(mut tagged) => {
            tagged.value = stringify_keys(tagged.value)?;
            serde_yaml::Value::Tagged(tagged)
        }
        other => other,
    })
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

/// 是否为保留键：至少包含一个有大小写之分的字符，且不含小写字符
pub fn is_reserved_key(key: &str) -> bool {
    key.chars().any(char::is_uppercase) && !key.chars().any(char::is_lowercase)
}

/// 一次合并的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// 已写入的键
    pub applied: Vec<String>,
    /// 因保留键被拒绝的键
    pub rejected: Vec<String>,
}

/// 将文档合并到进程配置
pub fn apply_document(document: &ConfigDocument, target: &ProcessConfig) -> MergeReport {
    let mut report = MergeReport::default();

    for (key, value) in &document.parsed {
        if is_reserved_key(key) {
            warn!(
                key = %key,
                data_id = %document.data_id,
                group = %document.group,
                "[nacos listener] key({key}) is reserved (all uppercase), skipped"
            );
            report.rejected.push(key.clone());
            continue;
        }
        target.insert(key.clone(), value.clone());
        report.applied.push(key.clone());
    }

    report
}
