//! Update Error Types

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Received {received} bytes, expected {expected}")]
    ContentIntegrity { expected: u64, received: u64 },

    #[error("Malformed update descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Update is invalid: {0}")]
    InvalidUpdate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Archive extraction error: {0}")]
    Archive(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl UpdateError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Retry policy belongs to the caller; nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::ContentIntegrity { .. } | Self::Storage(_)
        )
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => Self::Storage(io),
            other => Self::Archive(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
