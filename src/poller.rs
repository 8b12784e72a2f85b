//! Status polling for server-side jobs.
//!
//! A job starts out as [`JobStatus::Processing`] before the first poll. The
//! poller checks immediately, then sleeps `interval` between checks while the
//! status is `processing` or `partial`. `failed` and `completed` end the loop.
//!
//! With a `max_wait` budget, another poll is only scheduled while
//! `elapsed + interval <= max_wait`; otherwise the job is reported as
//! [`OverwriteError::JobTimeout`]. The remote job keeps running either way.

use crate::error::{OverwriteError, OverwriteResult};
use crate::portal::Portal;
use crate::progress::Progress;
use crate::transport::{ApiRequest, HttpBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Partial,
    #[default]
    Processing,
    Failed,
    Completed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Partial => "partial",
            JobStatus::Processing => "processing",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` polls until a terminal status, however long that takes.
    pub max_wait: Option<Duration>,
    /// Logical-error retries for each status request. Status reads are safe
    /// to repeat.
    pub max_retries: u32,
}

impl PollConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
            max_retries: 0,
        }
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// The outcome of a job that reached `completed`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub status: JobStatus,
    pub polls: u32,
    pub elapsed: Duration,
    /// Last status payload from the server.
    pub payload: Value,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: JobStatus,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

pub struct JobPoller<'a, B> {
    portal: &'a Portal<B>,
    progress: &'a dyn Progress,
}

impl<'a, B: HttpBackend> JobPoller<'a, B> {
    pub fn new(portal: &'a Portal<B>, progress: &'a dyn Progress) -> Self {
        Self { portal, progress }
    }

    pub async fn await_terminal(
        &self,
        item_id: &str,
        job_id: Option<&str>,
        config: &PollConfig,
    ) -> OverwriteResult<JobReport> {
        let job = job_id.unwrap_or(item_id).to_string();
        let mut request = ApiRequest::query(
            self.portal
                .endpoints()
                .item_status(self.portal.username(), item_id),
        )
        .param("f", "json")
        .param("token", self.portal.token());
        if let Some(job_id) = job_id {
            request = request.param("jobId", job_id);
        }

        let start = Instant::now();
        let mut status = JobStatus::default();
        let mut polls: u32 = 0;

        loop {
            let payload = self
                .portal
                .transport()
                .call(&request, config.max_retries)
                .await?;
            polls += 1;

            let parsed: StatusResponse = serde_json::from_value(payload.clone()).map_err(|e| {
                error!(
                    job = %job,
                    error = %e,
                    payload = %payload,
                    "[POLL] Unreadable status response"
                );
                OverwriteError::InvalidResponse {
                    message: format!("status of job {job}: {e}"),
                }
            })?;

            if polls == 1 || parsed.status != status {
                info!(
                    job = %job,
                    from = %status,
                    to = %parsed.status,
                    polls,
                    message = parsed.status_message.as_deref().unwrap_or(""),
                    "[POLL] Job status changed"
                );
                self.progress.milestone(&format!("  {}", parsed.status));
            }
            status = parsed.status;

            match status {
                JobStatus::Completed => {
                    return Ok(JobReport {
                        status,
                        polls,
                        elapsed: start.elapsed(),
                        payload,
                    });
                }
                JobStatus::Failed => {
                    error!(job = %job, polls, payload = %payload, "[POLL] Job failed");
                    return Err(OverwriteError::JobFailed { job, polls, payload });
                }
                JobStatus::Processing | JobStatus::Partial => {}
            }

            if let Some(max_wait) = config.max_wait {
                let waited = start.elapsed();
                if waited + config.interval > max_wait {
                    warn!(job = %job, polls, ?waited, ?max_wait, "[POLL] Giving up on job");
                    return Err(OverwriteError::JobTimeout { job, polls, waited });
                }
            }

            tokio::time::sleep(config.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::Endpoints;
    use crate::progress::SilentProgress;
    use crate::testing::{self, RecordingProgress, ScriptedBackend};
    use crate::transport::Transport;
    use serde_json::json;

    fn portal(backend: ScriptedBackend) -> Portal<ScriptedBackend> {
        Portal::new(
            Transport::new(backend),
            Endpoints::new("https://portal.test/sharing/rest"),
            "jdoe",
            testing::session("tok"),
        )
    }

    fn statuses(seq: &[&str]) -> Vec<Value> {
        seq.iter().map(|s| json!({ "status": s })).collect()
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Partial.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert_eq!(JobStatus::default(), JobStatus::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_exactly_three_polls() {
        let portal = portal(ScriptedBackend::new().on(
            "/status",
            statuses(&["processing", "processing", "completed"]),
        ));
        let config = PollConfig::new(Duration::from_millis(1500));

        let report = JobPoller::new(&portal, &SilentProgress)
            .await_terminal("item-1", None, &config)
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.polls, 3);
        assert_eq!(portal.transport().backend().count("/status"), 3);
        assert_eq!(report.elapsed, Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stops_without_a_third_poll() {
        let portal = portal(
            ScriptedBackend::new()
                .on("/status", statuses(&["processing", "failed", "completed"])),
        );
        let config = PollConfig::new(Duration::from_secs(2));

        let err = JobPoller::new(&portal, &SilentProgress)
            .await_terminal("item-1", Some("job-9"), &config)
            .await
            .unwrap_err();

        match err {
            OverwriteError::JobFailed { job, polls, payload } => {
                assert_eq!(job, "job-9");
                assert_eq!(polls, 2);
                assert_eq!(payload["status"], "failed");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(portal.transport().backend().count("/status"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_at_most_three_polls() {
        // A single scripted response repeats forever.
        let portal = portal(ScriptedBackend::new().on("/status", statuses(&["processing"])));
        let config = PollConfig::new(Duration::from_secs(2))
            .with_max_wait(Some(Duration::from_secs(5)));

        let err = JobPoller::new(&portal, &SilentProgress)
            .await_terminal("item-1", None, &config)
            .await
            .unwrap_err();

        match err {
            OverwriteError::JobTimeout { polls, waited, .. } => {
                assert!(polls <= 3);
                assert_eq!(polls, 3);
                assert!(waited <= Duration::from_secs(5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(portal.transport().backend().count("/status"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_keeps_polling_and_job_id_is_sent() {
        let portal = portal(ScriptedBackend::new().on(
            "/status",
            statuses(&["processing", "partial", "completed"]),
        ));
        let progress = RecordingProgress::default();

        let report = JobPoller::new(&portal, &progress)
            .await_terminal("item-1", Some("job-1"), &PollConfig::new(Duration::from_secs(2)))
            .await
            .unwrap();

        assert_eq!(report.polls, 3);
        let requests = portal.transport().backend().requests_to("/status");
        assert!(requests
            .iter()
            .all(|r| {
                r.param_value("jobId") == Some("job-1") && r.param_value("token") == Some("tok")
            }));
        assert_eq!(progress.lines(), vec!["  processing", "  partial", "  completed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_is_an_invalid_response() {
        let portal = portal(ScriptedBackend::new().on("/status", statuses(&["exploded"])));
        let err = JobPoller::new(&portal, &SilentProgress)
            .await_terminal("item-1", None, &PollConfig::new(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, OverwriteError::InvalidResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn logical_error_while_polling_is_fatal() {
        let portal = portal(ScriptedBackend::new().on(
            "/status",
            vec![json!({"error": {"code": 500, "message": "Item does not exist"}})],
        ));
        let err = JobPoller::new(&portal, &SilentProgress)
            .await_terminal("item-1", None, &PollConfig::new(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, OverwriteError::LogicalServer { code: 500, .. }));
    }
}
