//! Flare Nacos 公共库
//!
//! 提供服务实例注册、心跳保活、远端配置拉取与热更新功能

pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod metrics;
pub mod registry;
pub mod sync;
pub mod telemetry;

pub use client::NacosClient;
pub use config::{LoggingConfig, NacosSettings, ProcessConfig, load_bootstrap};
pub use error::{NacosError, Result};
pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatHandle, HeartbeatLoop};
pub use identity::{IdentityHints, ServiceIdentity, compose_service_name};
pub use registry::{
    ConfigChange, ConfigKey, HeartbeatOutcome, NacosHttpClient, RegistryClient, RegistryConnection,
};
pub use sync::{ConfigDocument, ConfigSync, MergeReport, apply_document, is_reserved_key};
