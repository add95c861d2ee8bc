//! Oncolink Services Library
//!
//! The three workflows of an access link: issuing and checking the credential, ingesting
//! documents under it, and erasing everything it owns. Each service receives its
//! collaborators through constructors and takes a [`RequestContext`] per call.
//!
//! [`RequestContext`]: oncolink_core::RequestContext

pub mod analysis;
pub mod credentials;
pub mod erasure;
pub mod ingestion;

#[cfg(test)]
pub mod test_helpers;

#[cfg(feature = "anthropic")]
pub use analysis::{AnthropicClient, AnthropicConfig};
pub use analysis::PromptTemplates;
pub use credentials::CredentialManager;
pub use erasure::{ErasureReport, SessionEraser};
pub use ingestion::{IngestionDeps, IngestionOutcome, IngestionPipeline};
