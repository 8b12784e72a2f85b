pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod load_config;
pub mod locator;
pub mod poller;
pub mod portal;
pub mod progress;
pub mod publish;
pub mod session;
pub mod share;
pub mod transport;
pub mod upload;
pub mod workflow;

#[cfg(any(test, feature = "test-export-mocks"))]
pub mod testing;

pub use error::{OverwriteError, OverwriteResult};
pub use workflow::{overwrite, OverwriteReport};
