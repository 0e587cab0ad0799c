//! Nacos 扩展入口
//!
//! 启动顺序：
//! 1. 解析实例身份
//! 2. 注册实例（失败即启动失败）
//! 3. 启动心跳循环
//! 4. 首次拉取并应用配置（失败即启动失败）
//! 5. 安装配置变更订阅
//!
//! ## 使用方式
//!
//! ```rust,ignore
//! use flare_nacos::{NacosClient, load_bootstrap};
//!
//! let config = load_bootstrap(None);
//! let nacos = NacosClient::init_app(&config).await?;
//! // config 会随远端配置推送而更新
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{NacosSettings, ProcessConfig};
use crate::error::Result;
use crate::heartbeat::{HeartbeatHandle, HeartbeatLoop};
use crate::identity::{IdentityHints, ServiceIdentity};
use crate::metrics::NacosMetrics;
use crate::registry::{ConfigKey, NacosHttpClient, RegistryClient};
use crate::sync::ConfigSync;

/// 已安装到宿主应用的 Nacos 客户端
pub struct NacosClient {
    identity: ServiceIdentity,
    registry: Arc<dyn RegistryClient>,
    config: ProcessConfig,
    heartbeat: HeartbeatHandle,
    watcher: JoinHandle<()>,
}

impl NacosClient {
    /// 从进程配置与环境变量初始化（使用 HTTP 客户端与全局指标）
    pub async fn init_app(config: &ProcessConfig) -> Result<Self> {
        let settings = NacosSettings::from_process_config(config)?;
        let registry: Arc<dyn RegistryClient> = Arc::new(NacosHttpClient::from_settings(&settings)?);
        Self::init_with(
            &settings,
            &IdentityHints::from_env(),
            registry,
            config.clone(),
            Some(NacosMetrics::new()),
        )
        .await
    }

    /// 使用指定的注册中心客户端初始化
    pub async fn init_with(
        settings: &NacosSettings,
        hints: &IdentityHints,
        registry: Arc<dyn RegistryClient>,
        config: ProcessConfig,
        metrics: Option<NacosMetrics>,
    ) -> Result<Self> {
        let identity = ServiceIdentity::resolve(hints, settings);
        Self::start(
            identity,
            ConfigKey::new(settings.data_id.clone(), settings.group.clone()),
            settings.heartbeat_interval(),
            registry,
            config,
            metrics,
        )
        .await
    }

    async fn start(
        identity: ServiceIdentity,
        key: ConfigKey,
        heartbeat_interval: Duration,
        registry: Arc<dyn RegistryClient>,
        config: ProcessConfig,
        metrics: Option<NacosMetrics>,
    ) -> Result<Self> {
        registry.register_instance(&identity).await?;

        let mut heartbeat = HeartbeatLoop::new(registry.clone(), identity.clone(), heartbeat_interval);
        if let Some(metrics) = &metrics {
            heartbeat = heartbeat.with_metrics(metrics.clone());
        }
        let heartbeat = heartbeat.spawn()?;

        let mut sync = ConfigSync::new(registry.clone(), key, config.clone());
        if let Some(metrics) = metrics {
            sync = sync.with_metrics(metrics);
        }
        let watcher = match Self::sync_and_watch(Arc::new(sync)).await {
            Ok(watcher) => watcher,
            Err(err) => {
                heartbeat.abort();
                if let Err(deregister_err) = registry.deregister_instance(&identity).await {
                    warn!(identity = %identity, error = %deregister_err, "Failed to deregister instance after startup failure");
                }
                return Err(err);
            }
        };

        info!(identity = %identity, "Nacos client installed");
        Ok(Self {
            identity,
            registry,
            config,
            heartbeat,
            watcher,
        })
    }

    async fn sync_and_watch(sync: Arc<ConfigSync>) -> Result<JoinHandle<()>> {
        sync.initial_sync().await?;
        sync.subscribe().await
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// 进程配置句柄
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn heartbeat(&self) -> &HeartbeatHandle {
        &self.heartbeat
    }

    /// 停止后台任务并注销实例
    pub async fn shutdown(self) -> Result<()> {
        self.heartbeat.abort();
        self.watcher.abort();
        if let Err(err) = self.registry.deregister_instance(&self.identity).await {
            warn!(identity = %self.identity, error = %err, "Failed to deregister instance");
            return Err(err);
        }
        Ok(())
    }
}
