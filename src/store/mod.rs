//! Installation persistence.
//!
//! Callers hold an `Arc<dyn InstallationStore>`; the backing map is never
//! shared directly.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::installation::Installation;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("installation {0} not found")]
    NotFound(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Mutation applied to one record under that record's write lock.
pub type Mutation<'a> = &'a (dyn Fn(&mut Installation) + Send + Sync);

#[async_trait]
pub trait InstallationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Installation, StoreError>;

    /// Insert or replace a record.
    async fn put(&self, installation: Installation) -> Result<(), StoreError>;

    /// Snapshot of every record; order is unspecified.
    async fn list(&self) -> Result<Vec<Installation>, StoreError>;

    /// Apply `mutation` atomically with respect to other writers of `id` and
    /// return the updated record.
    async fn update(&self, id: &str, mutation: Mutation<'_>) -> Result<Installation, StoreError>;
}
