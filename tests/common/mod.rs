//! 测试用的内存注册中心

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flare_nacos::{
    ConfigChange, ConfigKey, HeartbeatOutcome, NacosError, ProcessConfig, RegistryClient, Result,
    ServiceIdentity,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Default)]
pub struct MockRegistry {
    /// 每次心跳的时间点
    pub beats: Mutex<Vec<Instant>>,
    /// 前 N 次心跳返回错误
    pub failing_beats: AtomicUsize,
    /// 前 N 次心跳直接 panic
    pub panicking_beats: AtomicUsize,
    pub registrations: AtomicUsize,
    pub deregistrations: AtomicUsize,
    pub reject_registration: AtomicBool,
    /// None 表示配置不存在
    pub config: Mutex<Option<String>>,
    pub watchers: Mutex<Vec<mpsc::Sender<ConfigChange>>>,
}

impl MockRegistry {
    pub fn with_config(content: &str) -> Self {
        let registry = Self::default();
        *registry.config.lock().unwrap() = Some(content.to_string());
        registry
    }

    pub fn beat_count(&self) -> usize {
        self.beats.lock().unwrap().len()
    }

    /// 模拟服务端推送完整文档
    pub async fn push(&self, key: &ConfigKey, content: &str) {
        *self.config.lock().unwrap() = Some(content.to_string());
        let watchers = self.watchers.lock().unwrap().clone();
        for tx in watchers {
            let _ = tx
                .send(ConfigChange {
                    key: key.clone(),
                    content: content.to_string(),
                })
                .await;
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn register_instance(&self, _identity: &ServiceIdentity) -> Result<()> {
        if self.reject_registration.load(Ordering::SeqCst) {
            return Err(NacosError::Unauthorized);
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deregister_instance(&self, _identity: &ServiceIdentity) -> Result<()> {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_heartbeat(&self, _identity: &ServiceIdentity) -> Result<HeartbeatOutcome> {
        self.beats.lock().unwrap().push(Instant::now());
        if take_one(&self.panicking_beats) {
            panic!("simulated adapter panic");
        }
        if take_one(&self.failing_beats) {
            return Err(NacosError::Status {
                status: 503,
                body: "server is busy".to_string(),
            });
        }
        Ok(HeartbeatOutcome::Alive {
            client_beat_interval: Some(Duration::from_secs(5)),
        })
    }

    async fn get_config(&self, key: &ConfigKey) -> Result<String> {
        self.config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| NacosError::ConfigNotFound {
                data_id: key.data_id.clone(),
                group: key.group.clone(),
            })
    }

    async fn watch_config(&self, _key: &ConfigKey, tx: mpsc::Sender<ConfigChange>) -> Result<()> {
        self.watchers.lock().unwrap().push(tx);
        Ok(())
    }
}

pub fn bootstrap(value: Value) -> ProcessConfig {
    match value {
        Value::Object(map) => ProcessConfig::from_map(map),
        _ => panic!("bootstrap must be an object"),
    }
}

/// 等待条件成立（最多 2 秒）
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// 收集测试期间的日志输出（仅当前线程）
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    /// 包含指定文本的日志行
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
