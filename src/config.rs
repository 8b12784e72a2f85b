// agol-overwrite/src/config.rs

use crate::locator::is_root_folder;
use crate::poller::PollConfig;
use crate::session::{Credentials, TokenRequest};
use crate::share::SharingPolicy;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Everything one overwrite run needs, with secrets already injected.
#[derive(Debug, Clone)]
pub struct OverwriteConfig {
    pub portal: PortalConfig,
    pub credentials: Credentials,
    pub target: TargetConfig,
    pub payload: PayloadConfig,
    pub sharing: SharingConfig,
    pub polling: PollingConfig,
    pub retries: RetryConfig,
}

impl OverwriteConfig {
    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.portal.base_url,
            username = %self.credentials.username,
            service = %self.target.service_name,
            payload = %self.payload.path.display(),
            sharing = self.sharing.enabled,
            "Loaded OverwriteConfig"
        );
        self.target.trace_loaded();
        self.payload.trace_loaded();
        debug!(?self, "OverwriteConfig loaded (full debug)");
    }

    /// Owner used for item and folder lookups.
    pub fn owner(&self) -> &str {
        self.target
            .owner
            .as_deref()
            .unwrap_or(&self.credentials.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub base_url: String,
    pub token: TokenRequest,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Title shared by the feature service and its shapefile archive item.
    pub service_name: String,
    /// Defaults to the authenticated user.
    pub owner: Option<String>,
    /// `None` is the owner's root folder.
    pub folder: Option<String>,
}

impl TargetConfig {
    pub fn trace_loaded(&self) {
        info!(
            service = %self.service_name,
            owner = self.owner.as_deref().unwrap_or("<username>"),
            folder = self.folder.as_deref().unwrap_or("<root>"),
            root = is_root_folder(self.folder.as_deref()),
            "Loaded target"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadConfig {
    pub path: PathBuf,
    pub tags: String,
    pub description: String,
    pub chunk_size: usize,
    pub max_record_count: u32,
}

impl PayloadConfig {
    pub fn trace_loaded(&self) {
        info!(
            path = %self.path.display(),
            chunk_size = self.chunk_size,
            max_record_count = self.max_record_count,
            "Loaded payload"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharingConfig {
    pub enabled: bool,
    pub policy: SharingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub upload: PollConfig,
    pub publish: PollConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Logical-error retries for lookup and status requests.
    pub max_retries: u32,
    pub backoff: Duration,
}
