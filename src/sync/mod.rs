//! 配置同步引擎
//!
//! 启动时拉取一次配置并应用；之后通过通道接收推送，每次推送都是完整文档，
//! 重新解析并走同一条合并路径。
//!
//! 推送由唯一的消费者任务按顺序处理，同一订阅的两次应用不会并发执行，
//! 进程配置的写入因此无需额外加锁。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ProcessConfig;
use crate::error::Result;
use crate::metrics::{NacosMetrics, SOURCE_INITIAL, SOURCE_PUSH};
use crate::registry::{ConfigChange, ConfigKey, RegistryClient};

mod policy;

pub use policy::{ConfigDocument, MergeReport, apply_document, is_reserved_key};

/// 推送通道容量
pub const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// 配置同步引擎
pub struct ConfigSync {
    client: Arc<dyn RegistryClient>,
    key: ConfigKey,
    target: ProcessConfig,
    metrics: Option<NacosMetrics>,
}

impl ConfigSync {
    pub fn new(client: Arc<dyn RegistryClient>, key: ConfigKey, target: ProcessConfig) -> Self {
        Self {
            client,
            key,
            target,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: NacosMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// 首次同步：拉取、解析并应用，任何错误都直接返回
    pub async fn initial_sync(&self) -> Result<MergeReport> {
        let raw = self.client.get_config(&self.key).await?;
        info!(config = %self.key, "[nacos listener] configuration found.");

        let report = self.apply_raw(&raw, SOURCE_INITIAL)?;
        info!(
            config = %self.key,
            applied = report.applied.len(),
            rejected = report.rejected.len(),
            "[nacos listener] configuration loaded."
        );
        Ok(report)
    }

    /// 解析原始内容并合并到进程配置
    ///
    /// 解析失败时进程配置保持不变。
    pub fn apply_raw(&self, raw: &str, source: &str) -> Result<MergeReport> {
        let document = match ConfigDocument::parse(&self.key, raw) {
            Ok(document) => document,
            Err(err) => {
                self.record(source, false, 0);
                return Err(err);
            }
        };

        let report = apply_document(&document, &self.target);
        self.record(source, true, report.rejected.len());
        Ok(report)
    }

    /// 安装变更订阅并启动消费者任务
    pub async fn subscribe(self: Arc<Self>) -> Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        self.client.watch_config(&self.key, tx).await?;
        Ok(tokio::spawn(async move { self.run_updates(rx).await }))
    }

    /// 按顺序消费推送，直到发送端全部关闭
    pub async fn run_updates(&self, mut rx: mpsc::Receiver<ConfigChange>) {
        while let Some(change) = rx.recv().await {
            if change.key != self.key {
                warn!(
                    expected = %self.key,
                    received = %change.key,
                    "[nacos listener] change for another configuration ignored"
                );
                continue;
            }

            match self.apply_raw(&change.content, SOURCE_PUSH) {
                Ok(report) => info!(
                    config = %self.key,
                    applied = report.applied.len(),
                    rejected = report.rejected.len(),
                    "[nacos listener] configuration updated."
                ),
                Err(err) => error!(
                    config = %self.key,
                    error = %err,
                    "[nacos listener] failed to apply pushed configuration, keeping last applied values"
                ),
            }
        }
        info!(config = %self.key, "[nacos listener] change stream closed");
    }

    fn record(&self, source: &str, success: bool, rejected: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_config_update(source, success, rejected);
        }
    }
}
