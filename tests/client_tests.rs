mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{MockRegistry, bootstrap, wait_until};
use flare_nacos::{
    ConfigKey, IdentityHints, NacosClient, NacosError, NacosSettings, ProcessConfig,
};
use serde_json::json;

fn host_config() -> ProcessConfig {
    bootstrap(json!({
        "NACOS_SERVER_ADDRESSES": "127.0.0.1:8848",
        "NACOS_NAMESPACE": "dev",
        "NACOS_DATA_ID": "app.yaml",
        "NACOS_GROUP": "DEFAULT_GROUP",
        "NACOS_SERVICE_NAME": "order-api",
    }))
}

fn hints() -> IdentityHints {
    IdentityHints {
        bind_host: None,
        bind_port: Some(8080),
    }
}

#[tokio::test]
async fn test_init_registers_syncs_and_watches() {
    let config = host_config();
    let settings = NacosSettings::from_process_config(&config).unwrap();
    let registry = Arc::new(MockRegistry::with_config(
        "port: 8080\nNACOS_GROUP: hijacked\nworkers: 4\n",
    ));

    let client = NacosClient::init_with(&settings, &hints(), registry.clone(), config.clone(), None)
        .await
        .unwrap();

    let identity = client.identity();
    assert_eq!(identity.service_name, "DEFAULT_GROUP@@order-api");
    assert_eq!(identity.ip.to_string(), "127.0.0.1");
    assert_eq!(identity.port, 8080);
    assert_eq!(identity.namespace, "dev");

    assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);
    assert!(client.heartbeat().is_running());
    assert_eq!(config.get("workers"), Some(json!(4)));
    assert_eq!(config.get("NACOS_GROUP"), Some(json!("DEFAULT_GROUP")));

    let beats = registry.clone();
    assert!(wait_until(|| beats.beat_count() >= 1).await);

    registry
        .push(&ConfigKey::new("app.yaml", "DEFAULT_GROUP"), "workers: 8\n")
        .await;
    let observed = client.config().clone();
    assert!(wait_until(|| observed.get("workers") == Some(json!(8))).await);
    assert_eq!(config.get("port"), Some(json!(8080)));

    client.shutdown().await.unwrap();
    assert_eq!(registry.deregistrations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let config = host_config();
    let settings = NacosSettings::from_process_config(&config).unwrap();
    let registry = Arc::new(MockRegistry::with_config("port: 8080\n"));
    registry.reject_registration.store(true, Ordering::SeqCst);

    let result = NacosClient::init_with(&settings, &hints(), registry.clone(), config.clone(), None).await;

    assert!(matches!(result, Err(NacosError::Unauthorized)));
    assert_eq!(registry.beat_count(), 0);
    assert_eq!(registry.deregistrations.load(Ordering::SeqCst), 0);
    assert!(!config.contains_key("port"));
}

#[tokio::test]
async fn test_missing_config_is_fatal() {
    let config = host_config();
    let settings = NacosSettings::from_process_config(&config).unwrap();
    let registry = Arc::new(MockRegistry::default());

    let result = NacosClient::init_with(&settings, &hints(), registry.clone(), config, None).await;

    assert!(matches!(result, Err(NacosError::ConfigNotFound { .. })));
    assert!(registry.watchers.lock().unwrap().is_empty());
    assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);
    assert_eq!(registry.deregistrations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_init_app_requires_settings() {
    let result = NacosClient::init_app(&ProcessConfig::new()).await;
    assert!(matches!(result, Err(NacosError::InvalidSettings(_))));
}
