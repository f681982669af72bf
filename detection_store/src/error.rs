use crate::key::FrameReference;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to write object {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read object {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Failed to encode detection batch: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode detection batch {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Detection batch for {frame} rejected: {reason}")]
    InvalidBatch {
        frame: FrameReference,
        reason: String,
    },
    #[error("Frame image {0} referenced by the batch does not exist")]
    MissingReference(FrameReference),
}

impl StorageError {
    /// I/O failures may succeed on a later attempt; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Write { .. } | StorageError::Read { .. })
    }
}
