//! Flare Nacos 配置模块
//!
//! 该模块负责：
//! - 加载宿主应用的引导配置（TOML 文件或目录）到 [`ProcessConfig`]
//! - 从引导配置中读取 Nacos 连接参数（全大写键）
//! - 日志配置定义

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use toml::Value;
use tracing::warn;

use crate::error::{NacosError, Result};

mod manager;
mod store;

pub use manager::ConfigManager;
pub use store::ProcessConfig;

/// 心跳默认间隔（秒）
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
/// 请求默认超时（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Nacos 连接与服务参数
///
/// 这些参数来自宿主的引导配置，键名全部大写。全大写键属于保留键，
/// 远端配置文档不能覆盖它们。
#[derive(Debug, Clone, Deserialize)]
pub struct NacosSettings {
    /// 服务器地址列表，支持数组或逗号分隔的字符串
    #[serde(rename = "NACOS_SERVER_ADDRESSES", deserialize_with = "deserialize_addresses")]
    pub server_addresses: Vec<String>,
    /// 命名空间 ID
    #[serde(rename = "NACOS_NAMESPACE", default)]
    pub namespace: String,
    /// 配置文档 data-id
    #[serde(rename = "NACOS_DATA_ID")]
    pub data_id: String,
    /// 分组
    #[serde(rename = "NACOS_GROUP")]
    pub group: String,
    /// 原始服务名（不含分组前缀）
    #[serde(rename = "NACOS_SERVICE_NAME")]
    pub service_name: String,
    /// 调试模式，打印请求与响应
    #[serde(rename = "DEBUG", default)]
    pub debug: bool,
    /// 用户名
    #[serde(rename = "NACOS_USERNAME", default)]
    pub username: Option<String>,
    /// 密码
    #[serde(rename = "NACOS_PASSWORD", default)]
    pub password: Option<String>,
    /// 心跳间隔（秒）
    #[serde(rename = "NACOS_HEARTBEAT_INTERVAL", default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// 请求超时（秒）
    #[serde(rename = "NACOS_TIMEOUT", default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn deserialize_addresses<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Addresses {
        Joined(String),
        List(Vec<String>),
    }

    let raw = match Addresses::deserialize(deserializer)? {
        Addresses::Joined(joined) => vec![joined],
        Addresses::List(list) => list,
    };

    Ok(raw
        .iter()
        .flat_map(|item| item.split(','))
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect())
}

impl NacosSettings {
    /// 从进程配置中读取 Nacos 参数
    pub fn from_process_config(config: &ProcessConfig) -> Result<Self> {
        let settings: NacosSettings = serde_json::from_value(config.to_object())
            .map_err(|err| NacosError::InvalidSettings(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.server_addresses.is_empty() {
            crate::bail_settings!("NACOS_SERVER_ADDRESSES must list at least one server");
        }
        if self.data_id.trim().is_empty() {
            crate::bail_settings!("NACOS_DATA_ID must not be empty");
        }
        if self.group.trim().is_empty() {
            crate::bail_settings!("NACOS_GROUP must not be empty");
        }
        if self.service_name.trim().is_empty() {
            crate::bail_settings!("NACOS_SERVICE_NAME must not be empty");
        }
        if self.heartbeat_interval_secs == 0 {
            crate::bail_settings!("NACOS_HEARTBEAT_INTERVAL must be positive");
        }
        if self.timeout_secs == 0 {
            crate::bail_settings!("NACOS_TIMEOUT must be positive");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

impl LoggingConfig {
    /// 从引导配置的 `LOGGING` 表读取，缺失或无效时使用默认值
    pub fn from_process_config(config: &ProcessConfig) -> Self {
        config.get_as("LOGGING").unwrap_or_default()
    }
}

/// 加载引导配置
///
/// 未指定路径时依次尝试 `config` 目录与 `config.toml` 文件；全部失败时返回空配置，
/// 由后续的 [`NacosSettings::from_process_config`] 报告缺失的键。
pub fn load_bootstrap(path: Option<&str>) -> ProcessConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    for candidate in &candidates {
        match load_bootstrap_from_source(candidate) {
            Ok(mut merged) => {
                if let Err(e) = ConfigManager::load_environment_config(candidate, &mut merged) {
                    warn!("failed to load environment config: {}", e);
                }
                match into_process_config(merged) {
                    Ok(config) => return config,
                    Err(err) => warn!("failed to convert config from {}: {err}", candidate.display()),
                }
            }
            Err(err) => {
                warn!("failed to load config from {}: {err}", candidate.display());
            }
        }
    }

    warn!("no configuration source succeeded, starting with an empty configuration");
    ProcessConfig::new()
}

fn into_process_config(value: Value) -> anyhow::Result<ProcessConfig> {
    match serde_json::to_value(value).context("bootstrap configuration is not representable")? {
        JsonValue::Object(map) => Ok(ProcessConfig::from_map(map)),
        _ => Err(anyhow!("bootstrap configuration must be a table")),
    }
}

/// 从文件或目录加载 TOML 值
fn load_bootstrap_from_source(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_bootstrap_from_directory(path)
    } else {
        load_toml_value(path)
    }
}

/// 目录形式：`base.toml` 为基础，`overrides/*.toml` 按文件名顺序覆盖
fn load_bootstrap_from_directory(path: &Path) -> anyhow::Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("overrides"))?;
    Ok(merged)
}

fn merge_directory(root: &mut Value, dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

pub(crate) fn load_toml_value(path: &Path) -> anyhow::Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in {}", path.display()))?;
    Ok(value)
}

/// 递归合并：表按键合并，其他值整体覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn bootstrap(value: JsonValue) -> ProcessConfig {
        match value {
            JsonValue::Object(map) => ProcessConfig::from_map(map),
            _ => panic!("test bootstrap must be an object"),
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("flare-nacos-{name}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_settings_from_process_config() {
        let config = bootstrap(json!({
            "NACOS_SERVER_ADDRESSES": "10.0.0.1:8848, 10.0.0.2:8848",
            "NACOS_NAMESPACE": "dev",
            "NACOS_DATA_ID": "app.yaml",
            "NACOS_GROUP": "DEFAULT_GROUP",
            "NACOS_SERVICE_NAME": "svc",
            "DEBUG": true,
            "unrelated": 1,
        }));

        let settings = NacosSettings::from_process_config(&config).unwrap();
        assert_eq!(
            settings.server_addresses,
            vec!["10.0.0.1:8848".to_string(), "10.0.0.2:8848".to_string()]
        );
        assert_eq!(settings.namespace, "dev");
        assert!(settings.debug);
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(settings.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(settings.username.is_none());
    }

    #[test]
    fn test_settings_address_list() {
        let config = bootstrap(json!({
            "NACOS_SERVER_ADDRESSES": ["http://a:8848", "b:8848,c:8848"],
            "NACOS_DATA_ID": "app.yaml",
            "NACOS_GROUP": "g",
            "NACOS_SERVICE_NAME": "svc",
            "NACOS_HEARTBEAT_INTERVAL": 3,
        }));

        let settings = NacosSettings::from_process_config(&config).unwrap();
        assert_eq!(settings.server_addresses.len(), 3);
        assert_eq!(settings.namespace, "");
        assert!(!settings.debug);
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_settings_missing_key() {
        let config = bootstrap(json!({
            "NACOS_SERVER_ADDRESSES": "a:8848",
            "NACOS_GROUP": "g",
            "NACOS_SERVICE_NAME": "svc",
        }));

        let err = NacosSettings::from_process_config(&config).unwrap_err();
        assert!(matches!(err, NacosError::InvalidSettings(msg) if msg.contains("NACOS_DATA_ID")));
    }

    #[test]
    fn test_settings_empty_addresses() {
        let config = bootstrap(json!({
            "NACOS_SERVER_ADDRESSES": " , ",
            "NACOS_DATA_ID": "app.yaml",
            "NACOS_GROUP": "g",
            "NACOS_SERVICE_NAME": "svc",
        }));

        assert!(matches!(
            NacosSettings::from_process_config(&config),
            Err(NacosError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_logging_config_fallback() {
        let config = bootstrap(json!({ "LOGGING": { "level": "debug", "with_file": true } }));
        let logging = LoggingConfig::from_process_config(&config);
        assert_eq!(logging.level, "debug");
        assert!(logging.with_file);

        let logging = LoggingConfig::from_process_config(&ProcessConfig::new());
        assert_eq!(logging.level, "info");
    }

    #[test]
    fn test_merge_value() {
        let mut base: Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: Value = toml::from_str("[a]\ny = 3\n[b]\nz = true\n").unwrap();
        merge_value(&mut base, overlay);

        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_bool(), Some(true));
    }

    #[test]
    fn test_load_bootstrap_directory() {
        let dir = scratch_dir("bootstrap");
        fs::write(
            dir.join("base.toml"),
            "NACOS_SERVER_ADDRESSES = \"127.0.0.1:8848\"\nNACOS_GROUP = \"base\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.join("overrides")).unwrap();
        fs::write(dir.join("overrides/10-group.toml"), "NACOS_GROUP = \"override\"\n").unwrap();

        let config = load_bootstrap(dir.to_str());
        assert_eq!(config.get("NACOS_GROUP"), Some(json!("override")));
        assert_eq!(
            config.get("NACOS_SERVER_ADDRESSES"),
            Some(json!("127.0.0.1:8848"))
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_bootstrap_missing_path() {
        let config = load_bootstrap(Some("/nonexistent/flare-nacos/config.toml"));
        assert!(config.is_empty());
    }
}
