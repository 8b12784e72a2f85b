//! Request/response model and the retrying transport every call goes through.
//!
//! A request is described once as an [`ApiRequest`] (URL, ordered parameters,
//! encoding mode) and handed to an [`HttpBackend`]. The backend performs a
//! single attempt and returns decoded JSON; [`Transport`] classifies the JSON
//! into an [`ApiResponse`] and owns the bounded retry policy for logical
//! (error-carrying) responses.
//!
//! Transport-level failures (connection, timeout, bad bytes) are never retried
//! here. They propagate to the caller on the first attempt.

use crate::error::{OverwriteError, OverwriteResult};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Back-off between retries of a logical failure.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Fallback content type for a file part whose type cannot be guessed.
pub const GENERIC_BINARY_MIMETYPE: &str = "application/octet-stream";

/// How the parameters of a request are put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMode {
    /// GET with URL-encoded parameters appended to the URL.
    Query,
    /// POST with a URL-form-encoded body.
    Form,
    /// POST with a `multipart/form-data` body: text fields, then one file.
    Multipart(FilePart),
}

impl RequestMode {
    pub fn name(&self) -> &'static str {
        match self {
            RequestMode::Query => "query",
            RequestMode::Form => "form",
            RequestMode::Multipart(_) => "multipart",
        }
    }
}

/// The file field of a multipart request.
///
/// `filename` and `content` are required; `mimetype` falls back to a guess
/// from the filename extension, then to [`GENERIC_BINARY_MIMETYPE`].
#[derive(Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content: Vec<u8>,
    pub mimetype: Option<String>,
}

impl FilePart {
    pub fn new(field: impl Into<String>, filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            field: field.into(),
            filename: filename.into(),
            content,
            mimetype: None,
        }
    }

    /// The content type that will be sent for this part.
    pub fn resolved_mimetype(&self) -> String {
        match &self.mimetype {
            Some(m) => m.clone(),
            None => guess_mimetype(&self.filename).to_string(),
        }
    }
}

// Chunks are megabytes; print the size, not the bytes.
impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("field", &self.field)
            .field("filename", &self.filename)
            .field("content_len", &self.content.len())
            .field("mimetype", &self.mimetype)
            .finish()
    }
}

/// Guess a content type from a filename extension.
pub fn guess_mimetype(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => "application/zip",
        "json" | "geojson" => "application/json",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "xml" => "application/xml",
        _ => GENERIC_BINARY_MIMETYPE,
    }
}

/// A single call against the portal, independent of the HTTP client used.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub url: String,
    /// Parameters in the order they are sent.
    pub params: Vec<(String, String)>,
    pub mode: RequestMode,
    /// Extra headers on top of the ones every request carries.
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    fn with_mode(url: impl Into<String>, mode: RequestMode) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
            mode,
            headers: Vec::new(),
        }
    }

    pub fn query(url: impl Into<String>) -> Self {
        Self::with_mode(url, RequestMode::Query)
    }

    pub fn form(url: impl Into<String>) -> Self {
        Self::with_mode(url, RequestMode::Form)
    }

    pub fn multipart(url: impl Into<String>, file: FilePart) -> Self {
        Self::with_mode(url, RequestMode::Multipart(file))
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a parameter, if present.
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn file(&self) -> Option<&FilePart> {
        match &self.mode {
            RequestMode::Multipart(file) => Some(file),
            _ => None,
        }
    }
}

/// A response classified once, at the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Success(Value),
    /// The server answered, but with an `error` object or nothing at all.
    LogicalError {
        code: i64,
        message: String,
        details: Vec<String>,
        payload: Value,
    },
}

impl ApiResponse {
    pub fn from_json(payload: Value) -> Self {
        let Some(object) = payload.as_object() else {
            return ApiResponse::Success(payload);
        };

        if object.is_empty() {
            return ApiResponse::LogicalError {
                code: 0,
                message: "empty response".to_string(),
                details: Vec::new(),
                payload,
            };
        }

        let Some(error) = object.get("error") else {
            return ApiResponse::Success(payload);
        };

        let (code, message, details) = match error {
            Value::Object(e) => (
                e.get("code").and_then(Value::as_i64).unwrap_or(0),
                e.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified error")
                    .to_string(),
                e.get("details")
                    .and_then(Value::as_array)
                    .map(|d| {
                        d.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            Value::String(s) => (0, s.clone(), Vec::new()),
            other => (0, other.to_string(), Vec::new()),
        };

        ApiResponse::LogicalError {
            code,
            message,
            details,
            payload,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success(_))
    }

    /// The raw JSON exactly as the server returned it.
    pub fn payload(&self) -> &Value {
        match self {
            ApiResponse::Success(payload) | ApiResponse::LogicalError { payload, .. } => payload,
        }
    }

    /// Treat a logical error as fatal.
    pub fn into_result(self) -> OverwriteResult<Value> {
        match self {
            ApiResponse::Success(payload) => Ok(payload),
            ApiResponse::LogicalError {
                code,
                message,
                details,
                payload,
            } => {
                let message = if details.is_empty() {
                    message
                } else {
                    format!("{message} ({})", details.join("; "))
                };
                Err(OverwriteError::LogicalServer {
                    code,
                    message,
                    payload,
                })
            }
        }
    }
}

/// One HTTP attempt: encode, send, decompress, parse.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> OverwriteResult<Value>;
}

/// Lets a caller keep a handle on a backend it hands to a [`Transport`].
#[async_trait]
impl<T: HttpBackend + ?Sized> HttpBackend for Arc<T> {
    async fn execute(&self, request: &ApiRequest) -> OverwriteResult<Value> {
        (**self).execute(request).await
    }
}

/// Wraps a backend with the logical-error retry policy.
pub struct Transport<B> {
    backend: B,
    retry_backoff: Duration,
}

impl<B: HttpBackend> Transport<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Send `request`, retrying up to `max_retries` more times while the
    /// response is a logical error.
    ///
    /// When the budget runs out the last failing response is returned as-is;
    /// deciding whether it is fatal is up to the caller. Calls that could
    /// create duplicates on the server should keep `max_retries` at zero.
    pub async fn request(
        &self,
        request: &ApiRequest,
        max_retries: u32,
    ) -> OverwriteResult<ApiResponse> {
        let mut remaining = max_retries;
        let mut attempt: u32 = 1;

        loop {
            debug!(
                url = %request.url,
                mode = request.mode.name(),
                attempt,
                "[HTTP] Sending request"
            );
            let response = ApiResponse::from_json(self.backend.execute(request).await?);

            if response.is_success() || remaining == 0 {
                return Ok(response);
            }

            remaining -= 1;
            if let ApiResponse::LogicalError { code, message, .. } = &response {
                warn!(
                    url = %request.url,
                    code,
                    message = %message,
                    attempt,
                    remaining,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "[HTTP] Logical error response, retrying"
                );
            }
            tokio::time::sleep(self.retry_backoff).await;
            attempt += 1;
        }
    }

    /// [`Transport::request`] with any remaining logical error turned into
    /// [`OverwriteError::LogicalServer`].
    pub async fn call(&self, request: &ApiRequest, max_retries: u32) -> OverwriteResult<Value> {
        self.request(request, max_retries).await?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn error_body() -> Value {
        json!({"error": {"code": 498, "message": "Invalid token.", "details": ["expired"]}})
    }

    #[test]
    fn classifies_error_field_as_logical_failure() {
        let resp = ApiResponse::from_json(error_body());
        match resp {
            ApiResponse::LogicalError {
                code,
                message,
                details,
                ..
            } => {
                assert_eq!(code, 498);
                assert_eq!(message, "Invalid token.");
                assert_eq!(details, vec!["expired".to_string()]);
            }
            other => panic!("expected logical error, got {other:?}"),
        }
    }

    #[test]
    fn classifies_empty_object_as_logical_failure() {
        assert!(!ApiResponse::from_json(json!({})).is_success());
        assert!(ApiResponse::from_json(json!({"success": true})).is_success());
        assert!(ApiResponse::from_json(json!([1, 2])).is_success());
    }

    #[test]
    fn into_result_carries_payload_and_details() {
        let err = ApiResponse::from_json(error_body()).into_result().unwrap_err();
        match err {
            OverwriteError::LogicalServer {
                code,
                message,
                payload,
            } => {
                assert_eq!(code, 498);
                assert!(message.contains("expired"));
                assert_eq!(payload, error_body());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mimetype_falls_back_to_generic_binary() {
        assert_eq!(guess_mimetype("parks.ZIP"), "application/zip");
        assert_eq!(guess_mimetype("layer.geojson"), "application/json");
        assert_eq!(guess_mimetype("no_extension"), GENERIC_BINARY_MIMETYPE);
        assert_eq!(guess_mimetype("archive.shp"), GENERIC_BINARY_MIMETYPE);

        let part = FilePart::new("file", "parks.zip", vec![1, 2, 3]);
        assert_eq!(part.resolved_mimetype(), "application/zip");
        let part = FilePart {
            mimetype: Some("application/x-custom".to_string()),
            ..part
        };
        assert_eq!(part.resolved_mimetype(), "application/x-custom");
    }

    #[test]
    fn request_builder_preserves_parameter_order() {
        let req = ApiRequest::form("https://example.com/x")
            .param("f", "json")
            .param("partNum", 3)
            .param("token", "t");
        let keys: Vec<_> = req.params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["f", "partNum", "token"]);
        assert_eq!(req.param_value("partNum"), Some("3"));
        assert!(req.file().is_none());
    }

    #[test]
    fn file_part_debug_omits_content() {
        let part = FilePart::new("file", "a.zip", vec![0u8; 1024]);
        let dbg = format!("{part:?}");
        assert!(dbg.contains("content_len: 1024"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_budget_returns_first_failure_without_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut backend = MockHttpBackend::new();
        backend.expect_execute().times(1).returning(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(error_body())
        });

        let transport = Transport::new(backend);
        let start = tokio::time::Instant::now();
        let resp = transport
            .request(&ApiRequest::form("https://example.com/x"), 0)
            .await
            .unwrap();

        assert!(!resp.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_logical_failure_exactly_budget_times() {
        let mut backend = MockHttpBackend::new();
        backend
            .expect_execute()
            .times(3)
            .returning(|_| Ok(error_body()));

        let transport = Transport::new(backend);
        let start = tokio::time::Instant::now();
        let resp = transport
            .request(&ApiRequest::query("https://example.com/x"), 2)
            .await
            .unwrap();

        assert_eq!(resp.payload(), &error_body());
        assert_eq!(start.elapsed(), DEFAULT_RETRY_BACKOFF * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut backend = MockHttpBackend::new();
        backend.expect_execute().times(2).returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(json!({}))
            } else {
                Ok(json!({"success": true}))
            }
        });

        let transport = Transport::new(backend).with_retry_backoff(Duration::from_millis(1500));
        let resp = transport
            .request(&ApiRequest::form("https://example.com/x"), 5)
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transport_failures_are_not_retried() {
        let mut backend = MockHttpBackend::new();
        backend.expect_execute().times(1).returning(|_| {
            Err(OverwriteError::Decode {
                message: "truncated gzip stream".into(),
            })
        });

        let transport = Transport::new(backend);
        let err = transport
            .request(&ApiRequest::form("https://example.com/x"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, OverwriteError::Decode { .. }));
    }
}
