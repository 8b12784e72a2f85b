use crate::config::{
    OverwriteConfig, PayloadConfig, PollingConfig, PortalConfig, RetryConfig, SharingConfig,
    TargetConfig,
};
use crate::poller::PollConfig;
use crate::portal::DEFAULT_BASE_URL;
use crate::session::{
    Credentials, TokenRequest, DEFAULT_REFERER, DEFAULT_TOKEN_EXPIRATION_MINUTES,
};
use crate::share::SharingPolicy;
use crate::transport::DEFAULT_RETRY_BACKOFF;
use crate::upload::DEFAULT_CHUNK_SIZE;
use crate::publish::DEFAULT_MAX_RECORD_COUNT;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

pub const USERNAME_ENV: &str = "AGOL_USERNAME";
pub const PASSWORD_ENV: &str = "AGOL_PASSWORD";

const DEFAULT_HTTP_TIMEOUT_SECS: f64 = 300.0;
const DEFAULT_UPLOAD_POLL_SECS: f64 = 1.5;
const DEFAULT_PUBLISH_POLL_SECS: f64 = 2.0;
/// Largest part size accepted; each part is held in memory while it is sent.
const MAX_CHUNK_SIZE: usize = 100_000_000;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticConfig {
    #[serde(default)]
    portal: PortalSection,
    target: TargetSection,
    payload: PayloadSection,
    #[serde(default)]
    sharing: SharingSection,
    #[serde(default)]
    polling: PollingSection,
    #[serde(default)]
    retries: RetriesSection,
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PortalSection {
    base_url: String,
    referer: String,
    token_expiration_minutes: u32,
    http_timeout_secs: f64,
}

impl Default for PortalSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            token_expiration_minutes: DEFAULT_TOKEN_EXPIRATION_MINUTES,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetSection {
    service_name: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    folder: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PayloadSection {
    path: PathBuf,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_max_record_count")]
    max_record_count: u32,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_record_count() -> u32 {
    DEFAULT_MAX_RECORD_COUNT
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct SharingSection {
    enabled: bool,
    everyone: bool,
    org: bool,
    groups: Vec<String>,
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PollingSection {
    upload_interval_secs: f64,
    publish_interval_secs: f64,
    max_wait_secs: Option<f64>,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            upload_interval_secs: DEFAULT_UPLOAD_POLL_SECS,
            publish_interval_secs: DEFAULT_PUBLISH_POLL_SECS,
            max_wait_secs: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetriesSection {
    max_retries: u32,
    backoff_secs: f64,
}

impl Default for RetriesSection {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_secs: DEFAULT_RETRY_BACKOFF.as_secs_f64(),
        }
    }
}

/// Seconds from the YAML file as a [`Duration`]; must be finite and positive.
fn positive_secs(field: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        error!(field, secs, "Duration setting must be a positive number of seconds");
        anyhow::bail!("{field} must be a positive number of seconds, got {secs}");
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("{field} is out of range: {secs}"))
}

fn non_negative_secs(field: &str, secs: f64) -> Result<Duration> {
    if secs == 0.0 {
        return Ok(Duration::ZERO);
    }
    positive_secs(field, secs)
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            info!(var = name, "Secret found in env");
            Ok(value)
        }
        Ok(_) => {
            error!(var = name, "Environment variable is empty");
            anyhow::bail!("{name} environment variable is empty")
        }
        Err(e) => {
            error!(error = ?e, var = name, "Environment variable not set");
            Err(anyhow::anyhow!("{name} environment variable not set: {e}"))
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects the portal
/// credentials from `AGOL_USERNAME` and `AGOL_PASSWORD`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<OverwriteConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let username = require_env(USERNAME_ENV)?;
    let password = require_env(PASSWORD_ENV)?;

    let base_url = static_conf.portal.base_url.trim().to_string();
    url::Url::parse(&base_url)
        .with_context(|| format!("portal.base_url is not a URL: {base_url}"))?;

    if static_conf.target.service_name.trim().is_empty() {
        error!("target.service_name is empty");
        anyhow::bail!("target.service_name must not be empty");
    }
    if static_conf.payload.chunk_size == 0 {
        error!("payload.chunk_size is zero");
        anyhow::bail!("payload.chunk_size must be greater than zero");
    }
    if static_conf.payload.chunk_size > MAX_CHUNK_SIZE {
        error!(chunk_size = static_conf.payload.chunk_size, "payload.chunk_size is too large");
        anyhow::bail!(
            "payload.chunk_size must be at most {MAX_CHUNK_SIZE} bytes, got {}",
            static_conf.payload.chunk_size
        );
    }

    let max_wait = static_conf
        .polling
        .max_wait_secs
        .map(|secs| positive_secs("polling.max_wait_secs", secs))
        .transpose()?;
    let retries = RetryConfig {
        max_retries: static_conf.retries.max_retries,
        backoff: non_negative_secs("retries.backoff_secs", static_conf.retries.backoff_secs)?,
    };
    let polling = PollingConfig {
        upload: PollConfig::new(positive_secs(
            "polling.upload_interval_secs",
            static_conf.polling.upload_interval_secs,
        )?)
        .with_max_wait(max_wait)
        .with_max_retries(retries.max_retries),
        publish: PollConfig::new(positive_secs(
            "polling.publish_interval_secs",
            static_conf.polling.publish_interval_secs,
        )?)
        .with_max_wait(max_wait)
        .with_max_retries(retries.max_retries),
    };

    let sharing = static_conf.sharing;
    let groups: Vec<String> = sharing
        .groups
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();

    let config = OverwriteConfig {
        portal: PortalConfig {
            base_url,
            token: TokenRequest {
                referer: static_conf.portal.referer,
                expiration_minutes: static_conf.portal.token_expiration_minutes,
            },
            http_timeout: positive_secs(
                "portal.http_timeout_secs",
                static_conf.portal.http_timeout_secs,
            )?,
        },
        credentials: Credentials::new(username, password),
        target: TargetConfig {
            service_name: static_conf.target.service_name,
            owner: static_conf.target.owner.filter(|o| !o.trim().is_empty()),
            folder: static_conf.target.folder,
        },
        payload: PayloadConfig {
            path: static_conf.payload.path,
            tags: static_conf.payload.tags,
            description: static_conf.payload.description,
            chunk_size: static_conf.payload.chunk_size,
            max_record_count: static_conf.payload.max_record_count,
        },
        sharing: SharingConfig {
            enabled: sharing.enabled,
            policy: SharingPolicy {
                everyone: sharing.everyone,
                org: sharing.org,
                groups,
            },
        },
        polling,
        retries,
    };

    info!(
        service = %config.target.service_name,
        base_url = %config.portal.base_url,
        "Config loaded and merged successfully"
    );
    config.trace_loaded();
    Ok(config)
}
