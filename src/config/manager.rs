//! 配置管理器 - 负责处理不同环境下的引导配置覆盖
//!
//! 环境名称来自 `FLARE_ENV`，对应的 `environments/{env}.toml` 会合并到引导配置之上。

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use toml::Value;

use super::{load_toml_value, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 FLARE_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("FLARE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 环境配置文件路径
    ///
    /// 引导配置为目录时位于目录内，为文件时位于同级目录
    pub fn environment_config_path(source: &Path, environment: &str) -> PathBuf {
        let root = if source.is_dir() {
            source.to_path_buf()
        } else {
            source.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        root.join("environments").join(format!("{environment}.toml"))
    }

    /// 加载当前环境的配置并合并到引导配置中
    ///
    /// 环境文件不存在时不做任何修改
    pub fn load_environment_config(source: &Path, base: &mut Value) -> Result<()> {
        let path = Self::environment_config_path(source, &Self::get_environment());
        if path.exists() {
            let overlay = load_toml_value(&path)?;
            merge_value(base, overlay);
            tracing::debug!(path = %path.display(), "environment configuration merged");
        }
        Ok(())
    }
}
