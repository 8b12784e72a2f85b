//! Coordinating module for the authenticate-upload-publish-share run.

use crate::config::OverwriteConfig;
use crate::error::{OverwriteResult, Step, StepContext};
use crate::locator::{find_folder, find_item, ItemType};
use crate::portal::{Endpoints, Portal};
use crate::progress::Progress;
use crate::publish::{PublishRequest, Publisher};
use crate::session::Session;
use crate::share::share;
use crate::transport::{HttpBackend, Transport};
use crate::upload::{ChunkedUploader, UploadMetadata};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// What one successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverwriteReport {
    pub run_id: String,
    pub feature_service_id: String,
    /// The shapefile item whose content was replaced.
    pub archive_item_id: String,
    /// `""` for the root folder.
    pub folder_id: String,
    pub parts: u32,
    pub bytes: u64,
    pub sha256: String,
    pub service_item_id: String,
    pub shared: bool,
}

/// Run the whole overwrite once. Any error aborts the run.
pub async fn overwrite<B: HttpBackend>(
    config: &OverwriteConfig,
    backend: B,
    progress: &dyn Progress,
) -> OverwriteResult<OverwriteReport> {
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("run", run_id = %run_id, service = %config.target.service_name);

    let result = run(config, backend, progress, &run_id).instrument(span.clone()).await;
    if let Err(e) = &result {
        let step = e.step().map_or("run", Step::as_str);
        span.in_scope(|| error!(step, error = %e, "[RUN] Overwrite aborted"));
    }
    result
}

async fn run<B: HttpBackend>(
    config: &OverwriteConfig,
    backend: B,
    progress: &dyn Progress,
    run_id: &str,
) -> OverwriteResult<OverwriteReport> {
    info!(payload = %config.payload.path.display(), "[RUN] Overwrite starting");
    tokio::fs::metadata(&config.payload.path)
        .await
        .map_err(|e| {
            error!(
                path = %config.payload.path.display(),
                error = %e,
                "[RUN] Payload file is not readable"
            );
            e
        })
        .at(Step::ReadPayload)?;

    let transport = Transport::new(backend).with_retry_backoff(config.retries.backoff);
    let endpoints = Endpoints::new(&config.portal.base_url);
    let session =
        Session::authenticate(&transport, &endpoints, &config.credentials, &config.portal.token)
            .await
            .at(Step::Authenticate)?;
    progress.milestone("Token acquired");

    let portal = Portal::new(
        transport,
        endpoints,
        config.credentials.username.as_str(),
        session,
    );
    let owner = config.owner();
    let title = config.target.service_name.as_str();
    let retries = config.retries.max_retries;

    let service = find_item(&portal, title, owner, ItemType::FeatureService, retries)
        .await
        .at(Step::LocateItem)?;
    progress.milestone(&format!("Found feature service {title}: {}", service.id));
    let archive = find_item(&portal, title, owner, ItemType::Shapefile, retries)
        .await
        .at(Step::LocateItem)?;
    progress.milestone(&format!("Found shapefile item {title}: {}", archive.id));
    let folder_id = find_folder(&portal, owner, config.target.folder.as_deref(), retries)
        .await
        .at(Step::LocateFolder)?;

    let metadata = UploadMetadata {
        title: title.to_string(),
        tags: config.payload.tags.clone(),
        description: config.payload.description.clone(),
    };
    let upload = ChunkedUploader::new(
        &portal,
        progress,
        config.payload.chunk_size,
        config.polling.upload.clone(),
    )
    .upload(&config.payload.path, &archive.id, &folder_id, &metadata)
    .await?;

    let published = Publisher::new(&portal, progress, config.polling.publish.clone())
        .publish(&PublishRequest {
            item_id: &upload.item_id,
            service_name: title,
            max_record_count: config.payload.max_record_count,
            description: &config.payload.description,
        })
        .await?;
    progress.milestone(&format!(
        "Publish completed: service item {}",
        published.service_item_id
    ));

    let shared = if config.sharing.enabled {
        let policy = &config.sharing.policy;
        share(&portal, &published.service_item_id, &folder_id, policy)
            .await
            .at(Step::Share)?;
        progress.milestone(&format!(
            "Shared: everyone={}, org={}, groups={}",
            policy.everyone,
            policy.org,
            policy.groups.len()
        ));
        true
    } else {
        info!("[RUN] Sharing disabled, leaving audience unchanged");
        false
    };

    info!(
        service_item_id = %published.service_item_id,
        parts = upload.parts,
        bytes = upload.bytes,
        "[RUN] Overwrite complete"
    );
    Ok(OverwriteReport {
        run_id: run_id.to_string(),
        feature_service_id: service.id,
        archive_item_id: upload.item_id,
        folder_id,
        parts: upload.parts,
        bytes: upload.bytes,
        sha256: upload.sha256,
        service_item_id: published.service_item_id,
        shared,
    })
}
