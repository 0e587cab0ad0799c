//! 心跳循环
//!
//! 单一状态“运行中”：每个周期发送一次心跳，失败只记录日志，之后固定休眠一个间隔。
//! 循环本身不会因心跳失败退出，只随进程结束（或显式 abort）终止。
//!
//! 每次发送在独立任务中执行并被等待，适配器内部的 panic 会被收敛为 `JoinError`。

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{NacosError, Result};
use crate::identity::ServiceIdentity;
use crate::metrics::{NacosMetrics, OUTCOME_ALIVE, OUTCOME_FAILED, OUTCOME_NOT_FOUND};
use crate::registry::{HeartbeatOutcome, RegistryClient};

/// 默认心跳间隔
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// 心跳循环
pub struct HeartbeatLoop {
    client: Arc<dyn RegistryClient>,
    identity: ServiceIdentity,
    interval: Duration,
    metrics: Option<NacosMetrics>,
}

impl HeartbeatLoop {
    pub fn new(client: Arc<dyn RegistryClient>, identity: ServiceIdentity, interval: Duration) -> Self {
        Self {
            client,
            identity,
            interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: NacosMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 在当前 tokio 运行时上启动循环
    ///
    /// 没有可用的运行时时返回错误，启动失败在调用点即可观测。
    pub fn spawn(self) -> Result<HeartbeatHandle> {
        let runtime = Handle::try_current().map_err(|err| NacosError::Runtime(err.to_string()))?;

        info!(
            service_name = %self.identity.service_name,
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat loop started"
        );
        let task = runtime.spawn(self.run());
        Ok(HeartbeatHandle { task })
    }

    async fn run(self) {
        loop {
            self.beat_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// 执行一个心跳周期，返回本周期是否成功
    pub async fn beat_once(&self) -> bool {
        let client = Arc::clone(&self.client);
        let identity = self.identity.clone();
        let sent = tokio::spawn(async move { client.send_heartbeat(&identity).await }).await;

        match sent {
            Ok(Ok(HeartbeatOutcome::Alive { client_beat_interval })) => {
                debug!(
                    service_name = %self.identity.service_name,
                    server_interval_ms = client_beat_interval.map(|d| d.as_millis() as u64),
                    "Heartbeat acknowledged"
                );
                self.record(OUTCOME_ALIVE);
                true
            }
            Ok(Ok(HeartbeatOutcome::NotFound)) => {
                warn!(
                    service_name = %self.identity.service_name,
                    "Instance unknown to nacos, registering again"
                );
                self.record(OUTCOME_NOT_FOUND);
                self.reregister().await
            }
            Ok(Err(err)) => {
                error!("Failed to send heartbeat to nacos: {}", err);
                self.record(OUTCOME_FAILED);
                false
            }
            Err(join_err) => {
                error!("Failed to send heartbeat to nacos: task aborted: {}", join_err);
                self.record(OUTCOME_FAILED);
                false
            }
        }
    }

    async fn reregister(&self) -> bool {
        if let Some(metrics) = &self.metrics {
            metrics.reregistrations_total.inc();
        }
        match self.client.register_instance(&self.identity).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    service_name = %self.identity.service_name,
                    error = %err,
                    "Failed to register instance again"
                );
                false
            }
        }
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_heartbeat(outcome);
        }
    }
}

/// 心跳任务句柄
///
/// 丢弃句柄不会停止循环。
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// 停止循环（进程关闭时使用）
    pub fn abort(&self) {
        self.task.abort();
    }
}
