//! Oncolink Core Library
//!
//! This crate provides the error taxonomy, configuration, request context, streaming
//! encryption, and domain models shared across all oncolink components.

pub mod config;
pub mod context;
pub mod encryption;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use context::RequestContext;
pub use encryption::{ByteReader, SecureStream};
pub use error::{AppError, BoxError, Capability, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;

/// Result alias used throughout oncolink.
pub type AppResult<T> = Result<T, AppError>;
