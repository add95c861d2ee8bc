//! Database repositories for data access layer
//!
//! Postgres implementations of the repository ports. Queries are built with dynamic
//! `sqlx::query` so the crate builds without `DATABASE_URL` or `sqlx prepare`.

pub mod artifact;
pub mod document;
pub mod erasure;
pub mod session;

pub use artifact::PgArtifactRepository;
pub use document::PgDocumentRepository;
pub use erasure::{PgErasureStore, PgErasureTransaction};
pub use session::PgSessionRepository;
