//! 基于 Nacos v1 Open API 的注册中心客户端
//!
//! - 命名服务：`/nacos/v1/ns/instance`、`/nacos/v1/ns/instance/beat`
//! - 配置服务：`/nacos/v1/cs/configs`、`/nacos/v1/cs/configs/listener`（长轮询）
//! - 鉴权：`/nacos/v1/auth/login`，获取的 accessToken 附加到每个请求
//!
//! 多个服务器地址按顺序尝试，直到有一个返回非 5xx 响应。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::config::NacosSettings;
use crate::error::{NacosError, Result};
use crate::identity::ServiceIdentity;

use super::{ConfigChange, ConfigKey, HeartbeatOutcome, RegistryClient};

const INSTANCE_PATH: &str = "/nacos/v1/ns/instance";
const BEAT_PATH: &str = "/nacos/v1/ns/instance/beat";
const CONFIG_PATH: &str = "/nacos/v1/cs/configs";
const LISTENER_PATH: &str = "/nacos/v1/cs/configs/listener";
const LOGIN_PATH: &str = "/nacos/v1/auth/login";

/// 长轮询窗口，服务端在该时间内没有变更时返回空响应
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
/// 长轮询请求超时需要大于轮询窗口
const LONG_POLL_PADDING: Duration = Duration::from_secs(10);
/// 监听失败后的重试间隔
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// 实例不存在（需要重新注册）
const CODE_RESOURCE_NOT_FOUND: i64 = 20404;

const WORD_SEPARATOR: char = '\u{2}';
const LINE_SEPARATOR: char = '\u{1}';

/// 与注册中心的连接参数，进程生命周期内只建立一次
#[derive(Debug, Clone)]
pub struct RegistryConnection {
    /// 规范化后的服务器基础地址（含协议）
    pub server_addresses: Vec<String>,
    pub namespace: String,
    pub debug: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl RegistryConnection {
    pub fn from_settings(settings: &NacosSettings) -> Self {
        Self {
            server_addresses: settings
                .server_addresses
                .iter()
                .map(|addr| normalize_address(addr))
                .collect(),
            namespace: settings.namespace.clone(),
            debug: settings.debug,
            username: settings.username.clone(),
            password: settings.password.clone(),
            timeout: settings.timeout(),
        }
    }
}

/// 规范化服务器地址：补全 `http://`，去掉末尾的 `/`
pub fn normalize_address(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

/// 长轮询请求体：`dataId^2group^2md5[^2tenant]^1`
pub fn listening_configs(key: &ConfigKey, content_md5: &str, namespace: &str) -> String {
    let mut line = format!(
        "{}{WORD_SEPARATOR}{}{WORD_SEPARATOR}{content_md5}",
        key.data_id, key.group
    );
    if !namespace.is_empty() {
        line.push(WORD_SEPARATOR);
        line.push_str(namespace);
    }
    line.push(LINE_SEPARATOR);
    line
}

/// 配置内容摘要
pub fn content_md5(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeatInfo<'a> {
    service_name: &'a str,
    ip: String,
    port: u16,
    weight: f64,
    ephemeral: bool,
    cluster: &'a str,
    scheduled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeatResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    client_beat_interval: Option<u64>,
}

impl BeatResponse {
    fn outcome(&self) -> HeartbeatOutcome {
        if self.code == Some(CODE_RESOURCE_NOT_FOUND) {
            return HeartbeatOutcome::NotFound;
        }
        HeartbeatOutcome::Alive {
            client_beat_interval: self
                .client_beat_interval
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

/// 一次 API 调用的描述
struct ApiRequest {
    method: Method,
    path: &'static str,
    query: Vec<(&'static str, String)>,
    form: Vec<(&'static str, String)>,
    long_poll: bool,
}

impl ApiRequest {
    fn new(method: Method, path: &'static str) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            form: Vec::new(),
            long_poll: false,
        }
    }

    fn query(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    fn query_if(self, name: &'static str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.query(name, value)
        }
    }

    fn form(mut self, name: &'static str, value: impl ToString) -> Self {
        self.form.push((name, value.to_string()));
        self
    }

    fn long_poll(mut self) -> Self {
        self.long_poll = true;
        self
    }
}

struct ClientInner {
    connection: RegistryConnection,
    http: Client,
    token: RwLock<Option<AccessToken>>,
    /// 每个配置最近一次拉取内容的 md5，作为长轮询起点
    digests: DashMap<ConfigKey, String>,
}

/// Nacos HTTP 客户端
#[derive(Clone)]
pub struct NacosHttpClient {
    inner: Arc<ClientInner>,
}

impl NacosHttpClient {
    pub fn new(connection: RegistryConnection) -> Result<Self> {
        if connection.server_addresses.is_empty() {
            crate::bail_settings!("no nacos server address configured");
        }

        let http = Client::builder()
            .use_rustls_tls()
            .timeout(connection.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                connection,
                http,
                token: RwLock::new(None),
                digests: DashMap::new(),
            }),
        })
    }

    pub fn from_settings(settings: &NacosSettings) -> Result<Self> {
        Self::new(RegistryConnection::from_settings(settings))
    }

    pub fn connection(&self) -> &RegistryConnection {
        &self.inner.connection
    }

    /// 发送请求，按顺序尝试每个服务器地址
    async fn call(&self, request: ApiRequest) -> Result<(StatusCode, String)> {
        let token = self.access_token().await?;
        self.call_with_token(&request, token.as_deref()).await
    }

    async fn call_with_token(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<(StatusCode, String)> {
        let connection = &self.inner.connection;
        let mut last_error = None;

        for base in &connection.server_addresses {
            let url = format!("{base}{}", request.path);
            let mut builder = self
                .inner
                .http
                .request(request.method.clone(), &url)
                .query(&request.query);
            if let Some(token) = token {
                builder = builder.query(&[("accessToken", token)]);
            }
            if !request.form.is_empty() {
                builder = builder.form(&request.form);
            }
            if request.long_poll {
                builder = builder
                    .header(
                        "Long-Pulling-Timeout",
                        LONG_POLL_TIMEOUT.as_millis().to_string(),
                    )
                    .timeout(LONG_POLL_TIMEOUT + LONG_POLL_PADDING);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    debug!(url = %url, error = %err, "nacos server unreachable, trying next");
                    last_error = Some(NacosError::from(err));
                    continue;
                }
            };

            let status = response.status();
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(url = %url, error = %err, "failed to read nacos response, trying next");
                    last_error = Some(NacosError::from(err));
                    continue;
                }
            };
            // 登录响应包含 accessToken，不记录响应体
            if connection.debug && request.path == LOGIN_PATH {
                debug!(method = %request.method, url = %url, status = %status, "nacos response");
            } else if connection.debug {
                debug!(method = %request.method, url = %url, status = %status, body = %body, "nacos response");
            }

            if status.is_server_error() {
                last_error = Some(NacosError::status(status, body));
                continue;
            }
            return Ok((status, body));
        }

        Err(last_error.unwrap_or_else(|| {
            NacosError::InvalidSettings("no nacos server address configured".to_string())
        }))
    }

    /// 获取（必要时刷新）访问令牌；未配置用户名时返回 None
    async fn access_token(&self) -> Result<Option<String>> {
        let connection = &self.inner.connection;
        let (Some(username), Some(password)) = (&connection.username, &connection.password) else {
            return Ok(None);
        };

        if let Some(token) = self.inner.token.read().await.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(Some(token.token.clone()));
            }
        }

        let mut guard = self.inner.token.write().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(Some(token.token.clone()));
            }
        }

        let request = ApiRequest::new(Method::POST, LOGIN_PATH)
            .form("username", username)
            .form("password", password);
        let (status, body) = self.call_with_token(&request, None).await?;
        if !status.is_success() {
            return Err(NacosError::status(status, body));
        }

        let login: LoginResponse = serde_json::from_str(&body)?;
        // 提前 10% 刷新
        let ttl = Duration::from_secs(login.token_ttl.unwrap_or(18_000)).mul_f64(0.9);
        info!("nacos access token acquired");
        *guard = Some(AccessToken {
            token: login.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(Some(login.access_token))
    }

    fn instance_request(&self, method: Method, identity: &ServiceIdentity) -> ApiRequest {
        ApiRequest::new(method, INSTANCE_PATH)
            .query("serviceName", &identity.service_name)
            .query("groupName", &identity.group)
            .query_if("namespaceId", &identity.namespace)
            .query("ip", identity.ip)
            .query("port", identity.port)
            .query("clusterName", &identity.cluster)
            .query("ephemeral", identity.ephemeral)
    }

    /// 一次长轮询，返回配置是否发生变化
    async fn poll_once(&self, key: &ConfigKey) -> Result<bool> {
        let digest = self
            .inner
            .digests
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let request = ApiRequest::new(Method::POST, LISTENER_PATH)
            .form(
                "Listening-Configs",
                listening_configs(key, &digest, &self.inner.connection.namespace),
            )
            .long_poll();

        let (status, body) = self.call(request).await?;
        if !status.is_success() {
            return Err(NacosError::status(status, body));
        }
        Ok(!body.trim().is_empty())
    }

    async fn watch_loop(self, key: ConfigKey, tx: mpsc::Sender<ConfigChange>) {
        loop {
            let changed = tokio::select! {
                _ = tx.closed() => break,
                polled = self.poll_once(&key) => polled,
            };

            match changed {
                Ok(false) => {}
                Ok(true) => match self.get_config(&key).await {
                    Ok(content) => {
                        if tx
                            .send(ConfigChange {
                                key: key.clone(),
                                content,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(NacosError::ConfigNotFound { .. }) => {
                        warn!(config = %key, "[nacos listener] configuration removed, keeping last applied values");
                    }
                    Err(err) => {
                        warn!(config = %key, error = %err, "[nacos listener] failed to fetch changed configuration");
                        tokio::time::sleep(WATCH_RETRY_DELAY).await;
                    }
                },
                Err(err) => {
                    warn!(config = %key, error = %err, "[nacos listener] long polling failed, retrying");
                    tokio::time::sleep(WATCH_RETRY_DELAY).await;
                }
            }
        }
        debug!(config = %key, "[nacos listener] watch stopped");
    }
}

#[async_trait]
impl RegistryClient for NacosHttpClient {
    async fn register_instance(&self, identity: &ServiceIdentity) -> Result<()> {
        let request = self
            .instance_request(Method::POST, identity)
            .query("weight", identity.weight)
            .query("enable", true)
            .query("healthy", true);

        let (status, body) = self.call(request).await?;
        if !status.is_success() || body.trim() != "ok" {
            return Err(NacosError::status(status, body));
        }

        info!(
            service_name = %identity.service_name,
            ip = %identity.ip,
            port = identity.port,
            "Service instance registered"
        );
        Ok(())
    }

    async fn deregister_instance(&self, identity: &ServiceIdentity) -> Result<()> {
        let request = self.instance_request(Method::DELETE, identity);
        let (status, body) = self.call(request).await?;
        if !status.is_success() {
            return Err(NacosError::status(status, body));
        }

        info!(service_name = %identity.service_name, "Service instance deregistered");
        Ok(())
    }

    async fn send_heartbeat(&self, identity: &ServiceIdentity) -> Result<HeartbeatOutcome> {
        let beat = BeatInfo {
            service_name: &identity.service_name,
            ip: identity.ip.to_string(),
            port: identity.port,
            weight: identity.weight,
            ephemeral: identity.ephemeral,
            cluster: &identity.cluster,
            scheduled: false,
        };
        let request = ApiRequest::new(Method::PUT, BEAT_PATH)
            .query("serviceName", &identity.service_name)
            .query("groupName", &identity.group)
            .query_if("namespaceId", &identity.namespace)
            .query("beat", serde_json::to_string(&beat)?);

        let (status, body) = self.call(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(HeartbeatOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(NacosError::status(status, body));
        }

        // 旧版本服务端返回纯文本 "ok"
        let response: BeatResponse = serde_json::from_str(&body).unwrap_or_default();
        Ok(response.outcome())
    }

    async fn get_config(&self, key: &ConfigKey) -> Result<String> {
        let request = ApiRequest::new(Method::GET, CONFIG_PATH)
            .query("dataId", &key.data_id)
            .query("group", &key.group)
            .query_if("tenant", &self.inner.connection.namespace);

        let (status, body) = self.call(request).await?;
        if status == StatusCode::NOT_FOUND {
            self.inner.digests.insert(key.clone(), String::new());
            return Err(NacosError::ConfigNotFound {
                data_id: key.data_id.clone(),
                group: key.group.clone(),
            });
        }
        if !status.is_success() {
            return Err(NacosError::status(status, body));
        }

        self.inner.digests.insert(key.clone(), content_md5(&body));
        Ok(body)
    }

    async fn watch_config(&self, key: &ConfigKey, tx: mpsc::Sender<ConfigChange>) -> Result<()> {
        let client = self.clone();
        tokio::spawn(client.watch_loop(key.clone(), tx));
        info!(config = %key, "[nacos listener] watching configuration");
        Ok(())
    }
}
