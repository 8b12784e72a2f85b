//! Error taxonomy for the overwrite workflow.
//!
//! Every variant is fatal to a run. The only local recovery anywhere in the
//! crate is the bounded logical-error retry inside [`crate::transport`], and
//! only when a caller opts in.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias used across the library.
pub type OverwriteResult<T> = Result<T, OverwriteError>;

/// The stage of a run an error interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReadPayload,
    Authenticate,
    LocateItem,
    LocateFolder,
    Register,
    Parts,
    Commit,
    UploadWait,
    Publish,
    PublishWait,
    Share,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::ReadPayload => "read payload",
            Step::Authenticate => "authenticate",
            Step::LocateItem => "locate item",
            Step::LocateFolder => "locate folder",
            Step::Register => "register upload",
            Step::Parts => "upload parts",
            Step::Commit => "commit upload",
            Step::UploadWait => "wait for upload processing",
            Step::Publish => "publish",
            Step::PublishWait => "wait for publish job",
            Step::Share => "share",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum OverwriteError {
    /// The token endpoint answered without a usable token.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// A named item or folder could not be resolved to exactly one id.
    #[error("could not resolve {what} '{name}': {reason}")]
    NotFound {
        what: &'static str,
        name: String,
        reason: String,
    },

    /// Connection, timeout or HTTP client failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response bytes could not be turned into text (bad gzip, bad UTF-8).
    #[error("could not decode response body: {message}")]
    Decode { message: String },

    #[error("invalid JSON in response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A well-formed response carrying an `error` object (or nothing at all).
    #[error("server returned error {code}: {message}")]
    LogicalServer {
        code: i64,
        message: String,
        payload: serde_json::Value,
    },

    /// A registration, part or commit call did not succeed.
    #[error("upload failed: {message}")]
    Upload {
        message: String,
        payload: serde_json::Value,
    },

    #[error("job {job} failed after {polls} polls")]
    JobFailed {
        job: String,
        polls: u32,
        payload: serde_json::Value,
    },

    #[error("job {job} still running after {polls} polls ({waited:?}); check its status manually")]
    JobTimeout {
        job: String,
        polls: u32,
        waited: Duration,
    },

    #[error("publish failed: {message}")]
    Publish {
        message: String,
        payload: serde_json::Value,
    },

    #[error("sharing failed: {message}")]
    Share {
        message: String,
        payload: serde_json::Value,
    },

    /// A response parsed but did not have the shape the endpoint promises.
    #[error("unexpected response: {message}")]
    InvalidResponse { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any of the above, tagged with the step it interrupted.
    #[error("{source}")]
    AtStep {
        step: Step,
        source: Box<OverwriteError>,
    },
}

/// Tags the error side of a result with a [`Step`].
pub trait StepContext<T> {
    fn at(self, step: Step) -> OverwriteResult<T>;
}

impl<T, E: Into<OverwriteError>> StepContext<T> for Result<T, E> {
    fn at(self, step: Step) -> OverwriteResult<T> {
        self.map_err(|e| e.into().at(step))
    }
}

impl OverwriteError {
    /// Tag with `step`. An error that already carries a step keeps it.
    pub fn at(self, step: Step) -> Self {
        match self {
            tagged @ OverwriteError::AtStep { .. } => tagged,
            other => OverwriteError::AtStep {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The step this error was tagged with, `None` if it never was.
    pub fn step(&self) -> Option<Step> {
        match self {
            OverwriteError::AtStep { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The error with any step tag peeled off.
    pub fn root(&self) -> &OverwriteError {
        match self {
            OverwriteError::AtStep { source, .. } => source.root(),
            other => other,
        }
    }

    /// The raw server payload attached to this error, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self.root() {
            OverwriteError::LogicalServer { payload, .. }
            | OverwriteError::Upload { payload, .. }
            | OverwriteError::JobFailed { payload, .. }
            | OverwriteError::Publish { payload, .. }
            | OverwriteError::Share { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
