//! Production [`HttpBackend`] on top of reqwest.
//!
//! Gzip is negotiated and decoded here rather than by reqwest, so the
//! `Accept-Encoding` header and the decompression step are explicit.

use crate::error::{OverwriteError, OverwriteResult};
use crate::transport::{ApiRequest, HttpBackend, RequestMode};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

pub const USER_AGENT: &str = concat!("agol-overwrite/", env!("CARGO_PKG_VERSION"));

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(timeout: Duration) -> OverwriteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    fn build(&self, request: &ApiRequest) -> OverwriteResult<reqwest::RequestBuilder> {
        let builder = match &request.mode {
            RequestMode::Query => {
                let url = Url::parse_with_params(&request.url, &request.params)?;
                self.client.get(url)
            }
            RequestMode::Form => self
                .client
                .post(&request.url)
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(encode_form(&request.params)),
            RequestMode::Multipart(file) => {
                let mut form = Form::new();
                for (name, value) in &request.params {
                    form = form.text(name.clone(), value.clone());
                }
                let part = Part::bytes(file.content.clone())
                    .file_name(file.filename.clone())
                    .mime_str(&file.resolved_mimetype())?;
                form = form.part(file.field.clone(), part);
                self.client.post(&request.url).multipart(form)
            }
        };

        let mut builder = builder.header(ACCEPT_ENCODING, "gzip");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: &ApiRequest) -> OverwriteResult<Value> {
        let response = self.build(request)?.send().await?.error_for_status()?;

        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|enc| enc.eq_ignore_ascii_case("gzip"));
        let bytes = response.bytes().await?;
        debug!(
            url = %request.url,
            gzipped,
            len = bytes.len(),
            "[HTTP] Response received"
        );

        let text = decode_body(&bytes, gzipped).inspect_err(|e| {
            error!(error = %e, url = %request.url, "[HTTP] Failed to decode response body");
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub fn encode_form(params: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

/// Gunzip when the server said so, then require UTF-8.
pub fn decode_body(bytes: &[u8], gzipped: bool) -> OverwriteResult<String> {
    let raw = if gzipped {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| OverwriteError::Decode {
                message: format!("gzip: {e}"),
            })?;
        out
    } else {
        bytes.to_vec()
    };
    String::from_utf8(raw).map_err(|e| OverwriteError::Decode {
        message: format!("utf-8: {e}"),
    })
}
