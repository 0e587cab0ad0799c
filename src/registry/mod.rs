//! 注册中心客户端适配层
//!
//! 对注册中心 / 配置中心的薄封装：注册实例、发送心跳、拉取配置、监听配置变更。
//! 配置变更通过 `mpsc` 通道投递给同步引擎，投递机制与合并逻辑互不依赖。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identity::ServiceIdentity;

mod http;

pub use http::{NacosHttpClient, RegistryConnection};

/// 配置文档的复合键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    pub data_id: String,
    pub group: String,
}

impl ConfigKey {
    pub fn new(data_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            data_id: data_id.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.data_id, self.group)
    }
}

/// 一次配置推送：变更后的完整文档内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub key: ConfigKey,
    pub content: String,
}

/// 心跳结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// 服务端确认存活，可能附带建议的心跳间隔
    Alive { client_beat_interval: Option<Duration> },
    /// 服务端已不认识该实例，需要重新注册
    NotFound,
}

/// 注册中心客户端
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// 注册服务实例，启动时调用一次
    async fn register_instance(&self, identity: &ServiceIdentity) -> Result<()>;

    /// 注销服务实例
    async fn deregister_instance(&self, identity: &ServiceIdentity) -> Result<()>;

    /// 发送一次心跳（一次网络往返）
    async fn send_heartbeat(&self, identity: &ServiceIdentity) -> Result<HeartbeatOutcome>;

    /// 拉取配置文档原始内容
    async fn get_config(&self, key: &ConfigKey) -> Result<String>;

    /// 安装配置变更订阅
    ///
    /// 每次变更把完整的新文档发送到 `tx`；接收端关闭后订阅自行结束。
    async fn watch_config(&self, key: &ConfigKey, tx: mpsc::Sender<ConfigChange>) -> Result<()>;
}
