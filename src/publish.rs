//! Publishing the uploaded archive over the existing feature service.

use crate::error::{OverwriteError, OverwriteResult, Step, StepContext};
use crate::poller::{JobPoller, JobReport, PollConfig};
use crate::portal::Portal;
use crate::progress::Progress;
use crate::transport::{ApiRequest, ApiResponse, HttpBackend};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

pub const DEFAULT_MAX_RECORD_COUNT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest<'a> {
    /// The archive item that was just overwritten.
    pub item_id: &'a str,
    pub service_name: &'a str,
    pub max_record_count: u32,
    pub description: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub service_item_id: String,
    /// `None` when the server published synchronously.
    pub job: Option<JobReport>,
}

#[derive(Deserialize)]
struct PublishResponse {
    services: Vec<PublishedService>,
}

#[derive(Deserialize)]
struct PublishedService {
    #[serde(rename = "serviceItemId")]
    service_item_id: Option<String>,
    #[serde(rename = "jobId")]
    job_id: Option<String>,
    success: Option<bool>,
    error: Option<Value>,
}

/// The `publishParameters` JSON document.
pub fn publish_parameters(name: &str, max_record_count: u32, description: &str) -> String {
    json!({
        "name": name,
        "maxRecordCount": max_record_count,
        "description": description,
    })
    .to_string()
}

fn publish_error(message: impl Into<String>, payload: &Value) -> OverwriteError {
    let message = message.into();
    error!(
        message = %message,
        payload = %payload,
        "[PUBLISH] Could not interpret publish response"
    );
    OverwriteError::Publish {
        message,
        payload: payload.clone(),
    }
    .at(Step::Publish)
}

pub struct Publisher<'a, B> {
    portal: &'a Portal<B>,
    progress: &'a dyn Progress,
    poll: PollConfig,
}

impl<'a, B: HttpBackend> Publisher<'a, B> {
    pub fn new(portal: &'a Portal<B>, progress: &'a dyn Progress, poll: PollConfig) -> Self {
        Self {
            portal,
            progress,
            poll,
        }
    }

    /// Publish `item_id` with `overwrite=true` and return the service item id.
    pub async fn publish(&self, request: &PublishRequest<'_>) -> OverwriteResult<PublishOutcome> {
        info!(
            item_id = request.item_id,
            service = request.service_name,
            max_record_count = request.max_record_count,
            "[PUBLISH] Publishing with overwrite"
        );

        let call = ApiRequest::form(self.portal.endpoints().publish(self.portal.username()))
            .param("itemID", request.item_id)
            .param("filetype", "shapefile")
            .param("overwrite", "true")
            .param("f", "json")
            .param("token", self.portal.token())
            .param(
                "publishParameters",
                publish_parameters(
                    request.service_name,
                    request.max_record_count,
                    request.description,
                ),
            );

        let response = self
            .portal
            .transport()
            .request(&call, 0)
            .await
            .at(Step::Publish)?;
        let payload = match response {
            ApiResponse::Success(payload) => payload,
            ApiResponse::LogicalError { message, payload, .. } => {
                return Err(publish_error(format!("publish rejected: {message}"), &payload));
            }
        };

        let parsed: PublishResponse = serde_json::from_value(payload.clone())
            .map_err(|e| publish_error(format!("malformed publish response: {e}"), &payload))?;
        let Some(service) = parsed.services.into_iter().next() else {
            return Err(publish_error("publish response lists no services", &payload));
        };
        if let Some(err) = &service.error {
            return Err(publish_error(format!("service error: {err}"), &payload));
        }
        if service.success == Some(false) {
            return Err(publish_error("service reported success=false", &payload));
        }
        let Some(service_item_id) = service.service_item_id else {
            return Err(publish_error("publish response has no serviceItemId", &payload));
        };

        let job = match &service.job_id {
            Some(job_id) => {
                self.progress.milestone("Checking the status of publish..");
                let report = JobPoller::new(self.portal, self.progress)
                    .await_terminal(request.item_id, Some(job_id), &self.poll)
                    .await
                    .at(Step::PublishWait)?;
                Some(report)
            }
            None => None,
        };

        info!(service_item_id = %service_item_id, "[PUBLISH] Item finished publishing");
        Ok(PublishOutcome {
            service_item_id,
            job,
        })
    }
}
