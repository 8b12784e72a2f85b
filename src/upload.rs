//! Replacing an item's content with a multi-part upload.
//!
//! The transaction is: register the replacement (`update` with
//! `multipart=true`), send the payload as parts `1..=N` strictly in order,
//! `commit`, then wait for the item to finish processing. A part that is not
//! acknowledged abandons the whole transaction; there is no resume and no
//! partial commit. None of these calls are retried.

use crate::error::{OverwriteError, OverwriteResult, Step, StepContext};
use crate::locator::ItemType;
use crate::poller::{JobPoller, JobReport, PollConfig};
use crate::portal::Portal;
use crate::progress::Progress;
use crate::transport::{ApiRequest, ApiResponse, FilePart, HttpBackend};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info};

pub const DEFAULT_CHUNK_SIZE: usize = 10_000_000;

/// Item metadata sent with the replacement registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub title: String,
    pub tags: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    /// Id returned by the registration call; the committed item.
    pub item_id: String,
    pub parts: u32,
    pub bytes: u64,
    /// Hex SHA-256 of the payload as it was sent.
    pub sha256: String,
    pub job: JobReport,
}

/// Number of parts a payload of `payload_len` bytes is split into.
pub fn part_count(payload_len: u64, chunk_size: usize) -> u64 {
    payload_len.div_ceil(chunk_size as u64)
}

/// Reads fixed-size chunks; only the last one may be short.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            exhausted: false,
        }
    }

    /// `None` once a read returns zero bytes.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

pub struct ChunkedUploader<'a, B> {
    portal: &'a Portal<B>,
    progress: &'a dyn Progress,
    chunk_size: usize,
    poll: PollConfig,
}

impl<'a, B: HttpBackend> ChunkedUploader<'a, B> {
    pub fn new(
        portal: &'a Portal<B>,
        progress: &'a dyn Progress,
        chunk_size: usize,
        poll: PollConfig,
    ) -> Self {
        Self {
            portal,
            progress,
            chunk_size: chunk_size.max(1),
            poll,
        }
    }

    /// Replace the content of `target_item_id` (in `folder_id`, `""` for
    /// root) with the file at `path`, and wait until the server has
    /// processed it.
    pub async fn upload(
        &self,
        path: &Path,
        target_item_id: &str,
        folder_id: &str,
        metadata: &UploadMetadata,
    ) -> OverwriteResult<UploadOutcome> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OverwriteError::Upload {
                message: format!("payload path {} has no file name", path.display()),
                payload: Value::Null,
            })
            .at(Step::ReadPayload)?
            .to_string();
        let file = tokio::fs::File::open(path).await.at(Step::ReadPayload)?;
        let payload_len = file.metadata().await.at(Step::ReadPayload)?.len();
        info!(
            path = %path.display(),
            bytes = payload_len,
            chunk_size = self.chunk_size,
            expected_parts = part_count(payload_len, self.chunk_size),
            "[UPLOAD] Starting replacement upload"
        );
        if payload_len == 0 {
            error!(path = %path.display(), "[UPLOAD] Payload file is empty");
            return Err(OverwriteError::Upload {
                message: format!("payload file {} is empty", path.display()),
                payload: Value::Null,
            }
            .at(Step::ReadPayload));
        }

        let slot = self
            .register(&filename, target_item_id, folder_id, metadata)
            .await
            .at(Step::Register)?;
        let (parts, bytes, sha256) = self
            .send_parts(file, &filename, &slot)
            .await
            .at(Step::Parts)?;
        self.commit(&slot).await.at(Step::Commit)?;
        self.progress
            .milestone(&format!("Upload committed: {parts} parts, {bytes} bytes"));

        let job = JobPoller::new(self.portal, self.progress)
            .await_terminal(&slot, None, &self.poll)
            .await
            .at(Step::UploadWait)?;
        info!(item_id = %slot, polls = job.polls, "[UPLOAD] Item processed");

        Ok(UploadOutcome {
            item_id: slot,
            parts,
            bytes,
            sha256,
            job,
        })
    }

    async fn register(
        &self,
        filename: &str,
        target_item_id: &str,
        folder_id: &str,
        metadata: &UploadMetadata,
    ) -> OverwriteResult<String> {
        let request = ApiRequest::form(self.portal.endpoints().item_update(
            self.portal.username(),
            folder_id,
            target_item_id,
        ))
        .param("filename", filename)
        .param("type", ItemType::Shapefile.as_str())
        .param("title", &metadata.title)
        .param("tags", &metadata.tags)
        .param("description", &metadata.description)
        .param("f", "json")
        .param("multipart", "true")
        .param("token", self.portal.token());

        let payload = match self.portal.transport().request(&request, 0).await? {
            ApiResponse::Success(payload) => payload,
            ApiResponse::LogicalError { message, payload, .. } => {
                error!(
                    item_id = target_item_id,
                    payload = %payload,
                    "[UPLOAD] Registration rejected"
                );
                return Err(OverwriteError::Upload {
                    message: format!("registering the replacement was rejected: {message}"),
                    payload,
                });
            }
        };

        match payload.get("id").and_then(Value::as_str) {
            Some(id) => {
                info!(item_id = target_item_id, slot = id, "[UPLOAD] Replacement registered");
                Ok(id.to_string())
            }
            None => {
                error!(payload = %payload, "[UPLOAD] Registration response has no id");
                Err(OverwriteError::Upload {
                    message: "registration response has no item id".to_string(),
                    payload,
                })
            }
        }
    }

    async fn send_parts(
        &self,
        file: tokio::fs::File,
        filename: &str,
        slot: &str,
    ) -> OverwriteResult<(u32, u64, String)> {
        let url = self
            .portal
            .endpoints()
            .add_part(self.portal.username(), slot);
        let mut chunks = ChunkReader::new(file, self.chunk_size);
        let mut hasher = Sha256::new();
        let mut part_num: u32 = 0;
        let mut bytes: u64 = 0;

        while let Some(chunk) = chunks.next_chunk().await? {
            part_num += 1;
            let len = chunk.len();
            hasher.update(&chunk);

            let request = ApiRequest::multipart(&url, FilePart::new("file", filename, chunk))
                .param("f", "json")
                .param("token", self.portal.token())
                .param("partNum", part_num)
                .param("title", filename)
                .param("itemType", "file")
                .param("type", ItemType::Shapefile.as_str());

            let response = self.portal.transport().request(&request, 0).await?;
            if let Err(message) = check_acknowledged(&response) {
                let payload = response.payload().clone();
                error!(
                    part_num,
                    payload = %payload,
                    "[UPLOAD] Part not acknowledged, abandoning upload"
                );
                return Err(OverwriteError::Upload {
                    message: format!("part {part_num}: {message}"),
                    payload,
                });
            }
            bytes += len as u64;
            debug!(part_num, len, total = bytes, "[UPLOAD] Part acknowledged");
        }

        if part_num == 0 {
            return Err(OverwriteError::Upload {
                message: "payload file is empty".to_string(),
                payload: Value::Null,
            });
        }

        info!(parts = part_num, bytes, "[UPLOAD] All parts sent");
        Ok((part_num, bytes, format!("{:x}", hasher.finalize())))
    }

    async fn commit(&self, slot: &str) -> OverwriteResult<()> {
        let request = ApiRequest::form(
            self.portal
                .endpoints()
                .commit(self.portal.username(), slot),
        )
        .param("f", "json")
        .param("token", self.portal.token());

        let response = self.portal.transport().request(&request, 0).await?;
        if let Err(message) = check_acknowledged(&response) {
            let payload = response.payload().clone();
            error!(slot, payload = %payload, "[UPLOAD] Commit failed");
            return Err(OverwriteError::Upload {
                message: format!("commit: {message}"),
                payload,
            });
        }
        info!(slot, "[UPLOAD] Upload committed");
        Ok(())
    }
}

/// A part or commit counts as done only with an explicit `success: true`.
fn check_acknowledged(response: &ApiResponse) -> Result<(), String> {
    match response {
        ApiResponse::LogicalError { message, .. } => Err(message.clone()),
        ApiResponse::Success(payload) => match payload.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            Some(false) => Err("server reported success=false".to_string()),
            None => Err("response has no success indicator".to_string()),
        },
    }
}
