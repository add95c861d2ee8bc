//! Oncolink Storage Library
//!
//! This crate provides the storage port and its local filesystem and S3 implementations.
//!
//! # Storage key format
//!
//! Uploads are staged under `sessions/{session_id}/{request_id}/{sanitized_filename}.enc`.
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::{sanitize_filename, temp_object_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use oncolink_core::{ByteReader, StorageBackend};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
