//! Data models for the application
//!
//! A `Session` is the root aggregate. Documents, cases, and artifacts reference it by
//! `session_id` and are removed with it.

mod artifact;
mod document;
mod session;

pub use artifact::*;
pub use document::*;
pub use session::*;
