//! Token acquisition.
//!
//! A token is fetched once per run. There is no background renewal: a run
//! that outlives its token fails on the server's authorization error, which
//! is propagated like any other logical error. [`Session::refresh`] exists for
//! callers that want to re-authenticate explicitly.

use crate::error::{OverwriteError, OverwriteResult};
use crate::portal::Endpoints;
use crate::transport::{ApiRequest, ApiResponse, HttpBackend, Transport};
use serde::Deserialize;
use std::fmt;
use tracing::{error, info};

pub const DEFAULT_TOKEN_EXPIRATION_MINUTES: u32 = 60;
pub const DEFAULT_REFERER: &str = "http://www.arcgis.com/";

/// Username and password. The password is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the token endpoint needs besides credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub referer: String,
    pub expiration_minutes: u32,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            referer: DEFAULT_REFERER.to_string(),
            expiration_minutes: DEFAULT_TOKEN_EXPIRATION_MINUTES,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    /// Epoch milliseconds.
    expires: Option<i64>,
    #[serde(default)]
    ssl: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    expires: Option<i64>,
    ssl: bool,
}

impl Session {
    /// A session around a token that was issued elsewhere.
    pub fn new(token: impl Into<String>, expires: Option<i64>, ssl: bool) -> Self {
        Self {
            token: token.into(),
            expires,
            ssl,
        }
    }

    /// Exchange credentials for a token.
    pub async fn authenticate<B: HttpBackend>(
        transport: &Transport<B>,
        endpoints: &Endpoints,
        credentials: &Credentials,
        token_request: &TokenRequest,
    ) -> OverwriteResult<Self> {
        info!(username = %credentials.username, "[AUTH] Requesting token");

        let request = ApiRequest::form(endpoints.generate_token())
            .param("username", &credentials.username)
            .param("password", credentials.password())
            .param("expiration", token_request.expiration_minutes)
            .param("client", "referer")
            .param("referer", &token_request.referer)
            .param("f", "json");

        let payload = match transport.request(&request, 0).await? {
            ApiResponse::Success(payload) => payload,
            ApiResponse::LogicalError { code, message, .. } => {
                error!(code, message = %message, "[AUTH] Token request rejected");
                return Err(OverwriteError::Auth { message });
            }
        };

        let parsed: TokenResponse =
            serde_json::from_value(payload).map_err(|e| OverwriteError::Auth {
                message: format!("unreadable token response: {e}"),
            })?;

        let token = match parsed.token {
            Some(token) if !token.is_empty() => token,
            _ => {
                error!("[AUTH] Token response did not contain a token");
                return Err(OverwriteError::Auth {
                    message: "response did not contain a token".to_string(),
                });
            }
        };

        info!(expires = ?parsed.expires, ssl = parsed.ssl, "[AUTH] Token acquired");
        Ok(Self {
            token,
            expires: parsed.expires,
            ssl: parsed.ssl,
        })
    }

    /// Replace the token with a freshly issued one.
    pub async fn refresh<B: HttpBackend>(
        &mut self,
        transport: &Transport<B>,
        endpoints: &Endpoints,
        credentials: &Credentials,
        token_request: &TokenRequest,
    ) -> OverwriteResult<()> {
        *self = Self::authenticate(transport, endpoints, credentials, token_request).await?;
        Ok(())
    }

    pub fn token(&self) -> &str {
        &self.token
    }

}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("expires", &self.expires)
            .field("ssl", &self.ssl)
            .finish()
    }
}
