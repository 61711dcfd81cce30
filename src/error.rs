use crate::store::Partition;

/// Failures raised by a key-value store adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{partition} storage quota exceeded: {required} bytes needed, {quota} available")]
    QuotaExceeded {
        partition: Partition,
        required: u64,
        quota: u64,
    },

    #[error("failed to serialize value for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored value under key {key} is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend unavailable: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Errors surfaced by the repository layer and the message handler.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid import document: {0}")]
    InvalidImport(#[source] serde_json::Error),

    #[error(transparent)]
    Capture(#[from] crate::capture::CaptureError),

    #[error(transparent)]
    Brief(#[from] crate::llm::BriefError),
}

pub type Result<T, E = SidecarError> = std::result::Result<T, E>;
