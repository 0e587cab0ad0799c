//! Flare Nacos 错误模块
//!
//! - 启动路径（注册、首次拉取配置、读取引导配置）上的错误直接向调用方传播
//! - 心跳与配置监听路径上的错误只记录日志，不会中断后台任务

/// Nacos 集成错误
#[derive(Debug, thiserror::Error)]
pub enum NacosError {
    #[error("nacos request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("nacos responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("nacos rejected the credentials")]
    Unauthorized,

    #[error("configuration not found: data_id={data_id}, group={group}")]
    ConfigNotFound { data_id: String, group: String },

    #[error("invalid configuration document: {0}")]
    Document(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid nacos settings: {0}")]
    InvalidSettings(String),

    #[error("background task could not start: {0}")]
    Runtime(String),
}

impl NacosError {
    /// 服务端返回的非成功状态
    pub fn status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        match status.as_u16() {
            401 | 403 => NacosError::Unauthorized,
            code => NacosError::Status {
                status: code,
                body: body.into(),
            },
        }
    }
}

pub type Result<T, E = NacosError> = std::result::Result<T, E>;

/// 便捷宏：构造配置错误并提前返回
#[macro_export]
macro_rules! bail_settings {
    ($($arg:tt)*) => {
        return Err($crate::error::NacosError::InvalidSettings(format!($($arg)*)))
    };
}
