use std::path::PathBuf;

use thiserror::Error;

use crate::worker::RestartRejection;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to access state document {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid state document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("No commits found in {0}")]
    NoCommits(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Snapshot archive has no {0}")]
    MissingIndex(String),

    #[error("Remote execution failed on {address}: {source}")]
    Remote {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker not found: {0}")]
    WorkerNotFound(u32),

    #[error("Cannot restart worker {worker_id}: {reason}")]
    RestartRejected {
        worker_id: u32,
        reason: RestartRejection,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// True for upstream replies that could not be parsed. The poller retries
    /// these instead of failing the operation.
    pub fn is_malformed_response(&self) -> bool {
        matches!(self, ControllerError::MalformedResponse { .. })
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
