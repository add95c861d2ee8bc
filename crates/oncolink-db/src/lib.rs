//! Oncolink DB Library
//!
//! Repository ports consumed by the services and their Postgres implementations.

pub mod db;
pub mod setup;
pub mod traits;

pub use db::{PgArtifactRepository, PgDocumentRepository, PgErasureStore, PgSessionRepository};
pub use setup::setup_database;
pub use traits::{
    ArtifactRepository, DocumentRepository, ErasureStore, ErasureTransaction, SessionRepository,
};
