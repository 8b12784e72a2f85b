//! Test doubles shared by unit and integration tests.
//!
//! Compiled for `cfg(test)` and under the default `test-export-mocks`
//! feature, next to the `mockall` mocks.

use crate::error::{OverwriteError, OverwriteResult};
use crate::progress::Progress;
use crate::session::Session;
use crate::transport::{ApiRequest, HttpBackend};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A session with a fixed token and no expiry.
pub fn session(token: &str) -> Session {
    Session::new(token, None, true)
}

/// Serves canned JSON per URL suffix and records every request.
///
/// Responses for a route are handed out in order; the last one repeats once
/// the others are used up.
#[derive(Default)]
pub struct ScriptedBackend {
    routes: Mutex<Vec<(String, VecDeque<Value>)>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the responses for requests whose URL ends with `suffix`.
    #[must_use]
    pub fn on(self, suffix: &str, responses: impl IntoIterator<Item = Value>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((suffix.to_string(), responses.into_iter().collect()));
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, suffix: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(suffix))
            .collect()
    }

    pub fn count(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .count()
    }

    /// URL suffixes of all requests, in the order they were sent.
    pub fn call_log(&self) -> Vec<String> {
        let routes = self.routes.lock().unwrap();
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| {
                routes
                    .iter()
                    .find(|(suffix, _)| r.url.ends_with(suffix.as_str()))
                    .map(|(suffix, _)| suffix.clone())
                    .unwrap_or_else(|| r.url.clone())
            })
            .collect()
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn execute(&self, request: &ApiRequest) -> OverwriteResult<Value> {
        self.requests.lock().unwrap().push(request.clone());

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .iter_mut()
            .find(|(suffix, _)| request.url.ends_with(suffix.as_str()))
            .map(|(_, queue)| queue)
            .ok_or_else(|| OverwriteError::InvalidResponse {
                message: format!("no scripted response for {}", request.url),
            })?;

        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| OverwriteError::InvalidResponse {
            message: format!("scripted responses for {} are empty", request.url),
        })
    }
}

/// Collects milestone lines.
#[derive(Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Progress for RecordingProgress {
    fn milestone(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
