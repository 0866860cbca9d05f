use super::models::{AppConfig, RemoteClusterConfig};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config_is_valid() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.execution.work_packets, 20);
    assert_eq!(config.execution.ttl_success_seconds, 300);
    assert_eq!(config.execution.ttl_failure_seconds, 86_400);
    assert_eq!(config.search.bulk_chunk_size, 500);
    assert_eq!(config.search.max_result_window, 10_000);
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[search]
url = "http://search:9200"
index_prefix = "staging_"

[execution]
main_host = "media.example.com"
require_https = true
work_packets = 8
"#
    )
    .unwrap();

    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.search.url, "http://search:9200");
    assert_eq!(config.search.index_name(7), "staging_project_7");
    assert_eq!(config.execution.work_packets, 8);
    assert_eq!(config.execution.rest_url(), "https://media.example.com/rest");
    assert_eq!(config.execution.tus_url(), "https://media.example.com/files/");
    // 未出现在文件中的配置段使用默认值
    assert_eq!(config.database.max_connections, 10);
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/mediaflow.toml"));
    assert!(result.is_err());
}

#[test]
fn test_environment_override() {
    std::env::set_var("MEDIAFLOW_CACHE__KEY_PREFIX", "env-prefix");
    let config = AppConfig::load(None).unwrap();
    std::env::remove_var("MEDIAFLOW_CACHE__KEY_PREFIX");

    assert_eq!(config.cache.key_prefix, "env-prefix");
}

#[test]
fn test_toml_roundtrip() {
    let mut config = AppConfig::default();
    config.execution.main_host = "annotate.local".to_string();

    let toml_str = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.execution.main_host, "annotate.local");
    assert_eq!(parsed.execution.client_image(), config.execution.client_image());
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = AppConfig::default();
    config.execution.work_packets = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.execution.work_packets = 256;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.search.url = String::new();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.execution.remote = Some(RemoteClusterConfig {
        host: "gpu-cluster".to_string(),
        port: 6443,
        token: String::new(),
        cert_path: None,
    });
    assert!(config.validate().is_err());
}
