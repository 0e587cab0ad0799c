//! 服务实例身份解析
//!
//! 根据监听地址提示计算对外公布的 IP 与端口，并按 Nacos 分组服务名规则
//! 组合服务名：`{group}@@{service_name}`。
//!
//! 出口 IP 通过对一个不可路由地址执行 UDP `connect` 后读取本地地址得到，
//! 不发送任何报文，也不依赖 DNS。

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::config::NacosSettings;

/// 分组服务名分隔符，后端的分组命名规则要求固定为 `@@`
pub const GROUPED_NAME_SEPARATOR: &str = "@@";
/// 未提供端口提示时使用的端口
pub const DEFAULT_PORT: u16 = 5001;
/// 默认集群
pub const DEFAULT_CLUSTER: &str = "DEFAULT";

/// 监听地址环境变量
pub const RUN_HOST_ENV: &str = "FLARE_RUN_HOST";
/// 监听端口环境变量
pub const RUN_PORT_ENV: &str = "FLARE_RUN_PORT";

const IPV4_PROBE: &str = "10.255.255.255:1";
const IPV6_PROBE: &str = "[fd31:f903:5ab5:1::1]:1";

/// 身份解析所需的运行时提示
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityHints {
    pub bind_host: Option<String>,
    pub bind_port: Option<u16>,
}

impl IdentityHints {
    /// 从 `FLARE_RUN_HOST` / `FLARE_RUN_PORT` 读取，端口无法解析时忽略
    pub fn from_env() -> Self {
        Self {
            bind_host: env::var(RUN_HOST_ENV).ok(),
            bind_port: env::var(RUN_PORT_ENV)
                .ok()
                .and_then(|port| port.trim().parse().ok()),
        }
    }
}

/// 注册到注册中心的服务实例身份，启动时计算一次后不再变化
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceIdentity {
    /// 分组服务名 `{group}@@{raw}`
    pub service_name: String,
    pub group: String,
    pub ip: IpAddr,
    pub port: u16,
    pub namespace: String,
    pub cluster: String,
    pub weight: f64,
    pub ephemeral: bool,
}

impl ServiceIdentity {
    pub fn new(group: &str, raw_service_name: &str, ip: IpAddr, port: u16) -> Self {
        Self {
            service_name: compose_service_name(group, raw_service_name),
            group: group.to_string(),
            ip,
            port,
            namespace: String::new(),
            cluster: DEFAULT_CLUSTER.to_string(),
            weight: 1.0,
            ephemeral: true,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// 由提示和配置解析身份，不会失败
    pub fn resolve(hints: &IdentityHints, settings: &NacosSettings) -> Self {
        let ip = resolve_ip(hints.bind_host.as_deref());
        let port = resolve_port(hints.bind_port);
        Self::new(&settings.group, &settings.service_name, ip, port)
            .with_namespace(settings.namespace.clone())
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.service_name,
            SocketAddr::new(self.ip, self.port)
        )
    }
}

/// 组合分组服务名
pub fn compose_service_name(group: &str, raw_service_name: &str) -> String {
    format!("{group}{GROUPED_NAME_SEPARATOR}{raw_service_name}")
}

/// 根据监听地址提示解析对外 IP
///
/// - `0.0.0.0` → 本机出口 IPv4
/// - `[::1]`、`::`、`[::]` → 本机出口 IPv6
/// - 其他或缺失 → `127.0.0.1`
pub fn resolve_ip(bind_host: Option<&str>) -> IpAddr {
    match bind_host.map(str::trim) {
        Some("0.0.0.0") => interface_ip(IPV4_PROBE).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Some("[::1]" | "::" | "[::]") => {
            interface_ip(IPV6_PROBE).unwrap_or(IpAddr::V6(Ipv6Addr::LOCALHOST))
        }
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

pub fn resolve_port(bind_port: Option<u16>) -> u16 {
    bind_port.unwrap_or(DEFAULT_PORT)
}

fn interface_ip(probe: &str) -> Option<IpAddr> {
    let target: SocketAddr = probe.parse().ok()?;
    let bind: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        tracing::debug!(probe, "outward interface address unavailable");
        return None;
    }
    Some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_service_name() {
        assert_eq!(compose_service_name("g", "svc"), "g@@svc");
        assert_eq!(
            compose_service_name("DEFAULT_GROUP", "order-api"),
            "DEFAULT_GROUP@@order-api"
        );
    }

    #[test]
    fn test_resolve_ip_any_v4() {
        let ip = resolve_ip(Some("0.0.0.0"));
        assert!(ip.is_ipv4());
        assert!(!ip.is_unspecified());
    }

    #[test]
    fn test_resolve_ip_any_v6() {
        let ip = resolve_ip(Some("[::1]"));
        assert!(ip.is_ipv6());
    }

    #[test]
    fn test_resolve_ip_fallback() {
        for hint in [None, Some("localhost"), Some("192.168.1.5"), Some("")] {
            assert_eq!(resolve_ip(hint).to_string(), "127.0.0.1");
        }
    }

    #[test]
    fn test_resolve_port() {
        assert_eq!(resolve_port(None), DEFAULT_PORT);
        assert_eq!(resolve_port(Some(8080)), 8080);
    }

    #[test]
    fn test_identity_display() {
        let identity = ServiceIdentity::new("g", "svc", IpAddr::V4(Ipv4Addr::LOCALHOST), 5001);
        assert_eq!(identity.to_string(), "g@@svc@127.0.0.1:5001");
        assert_eq!(identity.cluster, DEFAULT_CLUSTER);
        assert!(identity.ephemeral);
    }
}
