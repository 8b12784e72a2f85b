use std::fs::write;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use serial_test::serial;

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

fn set_credentials() {
    env::set_var("AGOL_USERNAME", "jdoe");
    env::set_var("AGOL_PASSWORD", "top-secret-test-password");
}

/// A static config plus the credential env vars produces a complete OverwriteConfig.
#[tokio::test]
#[serial]
async fn test_load_config_success_injects_credentials() {
    let config_file = config_file(
        r#"
portal:
  base_url: "https://org.maps.arcgis.com/sharing/rest"
  token_expiration_minutes: 120
target:
  service_name: ParksLayer
  folder: Parks
payload:
  path: ./data/parks.zip
  tags: "overwrite, hosted, shapefile"
  description: Weekly parks update
  chunk_size: 5000000
sharing:
  enabled: true
  everyone: false
  org: true
  groups: ["g1", " ", "g2"]
polling:
  upload_interval_secs: 3
  max_wait_secs: 600
retries:
  max_retries: 2
  backoff_secs: 0.5
"#,
    );
    set_credentials();

    let config = agol_overwrite::load_config::load_config(config_file.path())
        .expect("Config should load");

    assert_eq!(config.credentials.username, "jdoe");
    assert_eq!(config.credentials.password(), "top-secret-test-password");
    assert_eq!(config.portal.base_url, "https://org.maps.arcgis.com/sharing/rest");
    assert_eq!(config.portal.token.expiration_minutes, 120);
    assert_eq!(config.portal.token.referer, "http://www.arcgis.com/");
    assert_eq!(config.target.service_name, "ParksLayer");
    assert_eq!(config.target.folder.as_deref(), Some("Parks"));
    assert_eq!(config.owner(), "jdoe");
    assert_eq!(config.payload.path, PathBuf::from("./data/parks.zip"));
    assert_eq!(config.payload.chunk_size, 5_000_000);
    assert_eq!(config.payload.max_record_count, 1000);
    assert_eq!(config.sharing.policy.groups, vec!["g1".to_string(), "g2".to_string()]);
    assert_eq!(config.polling.upload.interval, Duration::from_secs(3));
    assert_eq!(config.polling.publish.interval, Duration::from_secs(2));
    assert_eq!(config.polling.publish.max_wait, Some(Duration::from_secs(600)));
    assert_eq!(config.polling.upload.max_retries, 2);
    assert_eq!(config.retries.backoff, Duration::from_millis(500));

    let debug = format!("{:?}", config);
    assert!(!debug.contains("top-secret-test-password"), "password leaked: {debug}");
}

#[tokio::test]
#[serial]
async fn test_load_config_applies_defaults() {
    let config_file = config_file(
        r#"
target:
  service_name: ParksLayer
payload:
  path: parks.zip
"#,
    );
    set_credentials();

    let config = agol_overwrite::load_config::load_config(config_file.path())
        .expect("Config should load");
    assert_eq!(config.portal.base_url, "https://www.arcgis.com/sharing/rest");
    assert_eq!(config.portal.token.expiration_minutes, 60);
    assert_eq!(config.portal.http_timeout, Duration::from_secs(300));
    assert_eq!(config.payload.chunk_size, 10_000_000);
    assert_eq!(config.polling.upload.interval, Duration::from_millis(1500));
    assert_eq!(config.polling.upload.max_wait, None);
    assert_eq!(config.retries.max_retries, 0);
    assert_eq!(config.retries.backoff, Duration::from_secs(2));
    assert!(!config.sharing.enabled);
    assert!(config.target.folder.is_none());
}

/// Missing credentials make the loader fail.
#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_env() {
    let config_file =
        config_file("target:\n  service_name: ParksLayer\npayload:\n  path: parks.zip\n");

    env::remove_var("AGOL_USERNAME");
    env::remove_var("AGOL_PASSWORD");

    let err = agol_overwrite::load_config::load_config(config_file.path()).unwrap_err();
    let msg = err.to_string();

    assert!(
        msg.contains("AGOL_USERNAME") || msg.contains("AGOL_PASSWORD"),
        "Must error for missing env var, got: {msg}"
    );
}

/// If the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    let config_file = config_file("not-yaml: [:::");
    set_credentials();

    let err = agol_overwrite::load_config::load_config(config_file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_rejects_invalid_settings() {
    set_credentials();
    for (yaml, needle) in [
        (
            "target:\n  service_name: ParksLayer\npayload:\n  path: p.zip\n  chunk_size: 0\n",
            "chunk_size",
        ),
        (
            "target:\n  service_name: ParksLayer\npayload:\n  path: p.zip\n  chunk_size: 10000000000\n",
            "at most 100000000",
        ),
        (
            "target:\n  service_name: ParksLayer\npayload:\n  path: p.zip\npolling:\n  upload_interval_secs: 0\n",
            "upload_interval_secs",
        ),
        (
            "target:\n  service_name: \"\"\npayload:\n  path: p.zip\n",
            "service_name",
        ),
        (
            "portal:\n  base_url: not a url\ntarget:\n  service_name: ParksLayer\npayload:\n  path: p.zip\n",
            "base_url",
        ),
    ] {
        let config_file = config_file(yaml);
        let err = agol_overwrite::load_config::load_config(config_file.path()).unwrap_err();
        assert!(
            format!("{err:#}").contains(needle),
            "expected error about {needle}, got: {err:#}"
        );
    }
}
