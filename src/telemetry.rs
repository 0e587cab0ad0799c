//! 日志初始化
//!
//! `RUST_LOG` 优先，未设置时使用配置中的日志级别。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置，None 时使用默认配置（info 级别）
///
/// 重复初始化时静默忽略，便于测试与宿主应用各自调用。
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let _ = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter)
        .try_init();
}

/// 调试模式下提升 Nacos 模块的日志级别
pub fn logging_for_debug_flag(mut config: LoggingConfig, debug: bool) -> LoggingConfig {
    if debug {
        config.level = format!("{},flare_nacos=debug", config.level);
    }
    config
}
