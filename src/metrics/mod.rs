//! # Prometheus 指标收集模块
//!
//! 心跳与配置同步的计数指标。

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 注册在全局注册表上的指标，所有客户端共享
static GLOBAL_METRICS: Lazy<NacosMetrics> = Lazy::new(|| NacosMetrics::with_registry(&REGISTRY));

/// 心跳结果标签
pub const OUTCOME_ALIVE: &str = "alive";
pub const OUTCOME_NOT_FOUND: &str = "not_found";
pub const OUTCOME_FAILED: &str = "failed";

/// 配置来源标签
pub const SOURCE_INITIAL: &str = "initial";
pub const SOURCE_PUSH: &str = "push";

/// 注册与配置同步指标
#[derive(Clone)]
pub struct NacosMetrics {
    /// 心跳发送次数（按结果）
    pub heartbeats_total: IntCounterVec,
    /// 重新注册次数
    pub reregistrations_total: IntCounter,
    /// 配置应用次数（按来源与结果）
    pub config_updates_total: IntCounterVec,
    /// 被拒绝的保留键次数
    pub rejected_keys_total: IntCounter,
}

impl NacosMetrics {
    /// 全局注册表上的共享指标
    pub fn new() -> Self {
        GLOBAL_METRICS.clone()
    }

    /// 创建并注册到指定注册表，忽略重复注册错误
    pub fn with_registry(registry: &Registry) -> Self {
        let heartbeats_total = IntCounterVec::new(
            Opts::new(
                "nacos_heartbeats_total",
                "Total number of heartbeats sent to nacos",
            ),
            &["outcome"],
        )
        .expect("Failed to create nacos_heartbeats_total metric");

        let reregistrations_total = IntCounter::new(
            "nacos_reregistrations_total",
            "Total number of instance re-registrations after the server lost the instance",
        )
        .expect("Failed to create nacos_reregistrations_total metric");

        let config_updates_total = IntCounterVec::new(
            Opts::new(
                "nacos_config_updates_total",
                "Total number of configuration documents applied",
            ),
            &["source", "result"],
        )
        .expect("Failed to create nacos_config_updates_total metric");

        let rejected_keys_total = IntCounter::new(
            "nacos_config_rejected_keys_total",
            "Total number of reserved keys rejected from remote documents",
        )
        .expect("Failed to create nacos_config_rejected_keys_total metric");

        let _ = registry.register(Box::new(heartbeats_total.clone()));
        let _ = registry.register(Box::new(reregistrations_total.clone()));
        let _ = registry.register(Box::new(config_updates_total.clone()));
        let _ = registry.register(Box::new(rejected_keys_total.clone()));

        Self {
            heartbeats_total,
            reregistrations_total,
            config_updates_total,
            rejected_keys_total,
        }
    }

    pub fn record_heartbeat(&self, outcome: &str) {
        self.heartbeats_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_config_update(&self, source: &str, success: bool, rejected: usize) {
        let result = if success { "success" } else { "failure" };
        self.config_updates_total
            .with_label_values(&[source, result])
            .inc();
        self.rejected_keys_total.inc_by(rejected as u64);
    }
}

impl Default for NacosMetrics {
    fn default() -> Self {
        Self::new()
    }
}
