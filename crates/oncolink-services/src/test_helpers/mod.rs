//! Test helpers for service unit tests
//!
//! In-memory storage and repositories plus scripted collaborators, so the services can be
//! exercised without a database, object store or network.

pub mod collaborators;
pub mod fixtures;
pub mod memory_store;
pub mod mock_storage;

pub use collaborators::{finding, Script, ScriptedAnalysis, ScriptedExtractor};
pub use fixtures::*;
pub use memory_store::MemoryStore;
pub use mock_storage::MockStorage;
