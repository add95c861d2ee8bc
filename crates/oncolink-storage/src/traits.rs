//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::{ByteReader, StorageBackend};
use async_trait::async_trait;
use oncolink_core::AppError;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => AppError::NotFound(format!("Stored object {}", path)),
            StorageError::ConfigError(msg) => AppError::Internal(msg),
            other => AppError::data_access("storage", other),
        }
    }
}

/// Storage abstraction trait
///
/// Every operation streams: neither `save` nor `get` buffers the whole object.
/// A failed `save` leaves no object behind. `delete` of a missing object succeeds.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Consume `reader` until EOF and store it under `key`. Returns the stored path.
    async fn save(
        &self,
        key: &str,
        content_type: &str,
        reader: ByteReader,
    ) -> StorageResult<String>;

    /// Open a stored object for streaming reads.
    async fn get(&self, path: &str) -> StorageResult<ByteReader>;

    /// Delete a stored object. Missing objects are not an error.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
