use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use crate::config::{ConfigError, ConfigFormat, LoaderConfig};

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = LoaderConfig::default();
    assert_eq!(config.plugin, None);
    assert!(config.search_paths.is_empty());
    assert!(config.collective_enabled);
    assert!(!config.is_disabled());
}

#[test]
fn test_format_from_path() {
    assert_eq!(ConfigFormat::from_path(Path::new("loader.json")), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path(Path::new("LOADER.JSON")), Some(ConfigFormat::Json));
    #[cfg(feature = "yaml-config")]
    assert_eq!(ConfigFormat::from_path(Path::new("loader.yml")), Some(ConfigFormat::Yaml));
    #[cfg(feature = "toml-config")]
    assert_eq!(ConfigFormat::from_path(Path::new("loader.toml")), Some(ConfigFormat::Toml));
    assert_eq!(ConfigFormat::from_path(Path::new("loader.ini")), None);
    assert_eq!(ConfigFormat::from_path(Path::new("loader")), None);
}

#[test]
fn test_parse_json_fills_missing_fields() {
    let config = LoaderConfig::parse(r#"{ "plugin": "ib" }"#, ConfigFormat::Json).unwrap();
    assert_eq!(config.plugin.as_deref(), Some("ib"));
    assert!(config.collective_enabled);
    assert!(config.search_paths.is_empty());
}

#[test]
fn test_parse_json_error() {
    let err = LoaderConfig::parse("{ plugin: ", ConfigFormat::Json).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { format: "JSON", .. }));
}

#[cfg(feature = "toml-config")]
#[test]
fn test_parse_toml() {
    let text = r#"
plugin = "/opt/net/libnetplug-net-ib.so"
search_paths = ["/opt/net", "/usr/local/lib"]
collective_enabled = false
"#;
    let config = LoaderConfig::parse(text, ConfigFormat::Toml).unwrap();
    assert_eq!(config.plugin.as_deref(), Some("/opt/net/libnetplug-net-ib.so"));
    assert_eq!(
        config.search_paths,
        vec![PathBuf::from("/opt/net"), PathBuf::from("/usr/local/lib")]
    );
    assert!(!config.collective_enabled);
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_parse_yaml() {
    let text = "plugin: none\ncollective_enabled: true\n";
    let config = LoaderConfig::parse(text, ConfigFormat::Yaml).unwrap();
    assert!(config.is_disabled());
    assert!(config.collective_enabled);
}

#[tokio::test]
async fn test_load_from_file() {
    let dir = tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("loader.json");
    std::fs::write(&path, r#"{ "search_paths": ["/opt/net"], "collective_enabled": false }"#)
        .expect("Failed to write config");

    let config = LoaderConfig::load(&path).await.unwrap();
    assert_eq!(config.search_paths, vec![PathBuf::from("/opt/net")]);
    assert!(!config.collective_enabled);
}

#[tokio::test]
async fn test_load_missing_file_and_unknown_extension() {
    let dir = tempdir().expect("Failed to create temp directory");

    let err = LoaderConfig::load(dir.path().join("absent.json")).await.unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));

    let err = LoaderConfig::load(dir.path().join("loader.ini")).await.unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
}

#[test]
fn test_env_overrides() {
    let mut config = LoaderConfig::default();
    config
        .apply_env_from(env(&[("NETPLUG_NET_PLUGIN", "ib"), ("NETPLUG_COLLNET_ENABLE", "0")]))
        .unwrap();
    assert_eq!(config.plugin.as_deref(), Some("ib"));
    assert!(!config.collective_enabled);

    config.apply_env_from(env(&[("NETPLUG_COLLNET_ENABLE", "TRUE")])).unwrap();
    assert!(config.collective_enabled);
    assert_eq!(config.plugin.as_deref(), Some("ib"));
}

#[test]
fn test_env_disable_and_blank_plugin() {
    let mut config = LoaderConfig::default();
    config.apply_env_from(env(&[("NETPLUG_NET_PLUGIN", "  ")])).unwrap();
    assert_eq!(config.plugin, None);

    config.apply_env_from(env(&[("NETPLUG_NET_PLUGIN", "NONE")])).unwrap();
    assert!(config.is_disabled());
}

#[test]
fn test_env_invalid_flag() {
    let mut config = LoaderConfig::default();
    let err = config
        .apply_env_from(env(&[("NETPLUG_COLLNET_ENABLE", "maybe")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref value, .. } if value == "maybe"));
    assert!(config.collective_enabled);
}
