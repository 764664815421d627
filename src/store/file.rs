use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{InstallationStore, MemoryStore, Mutation, StoreError};
use crate::models::installation::Installation;

/// Memory store mirrored to a JSON file.
///
/// The file holds a JSON array of installations. It is read once on open and
/// rewritten (temp file + rename) after every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, treating a missing file as an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<Installation> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            count = records.len(),
            "loaded installations from file"
        );

        Ok(Self {
            path,
            inner: MemoryStore::from_records(records),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        // snapshot under the lock so the last writer always flushes the latest state
        let mut records = self.inner.snapshot();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl InstallationStore for JsonFileStore {
    async fn get(&self, id: &str) -> Result<Installation, StoreError> {
        self.inner.get(id).await
    }

    async fn put(&self, installation: Installation) -> Result<(), StoreError> {
        self.inner.put(installation).await?;
        self.persist().await
    }

    async fn list(&self) -> Result<Vec<Installation>, StoreError> {
        self.inner.list().await
    }

    async fn update(&self, id: &str, mutation: Mutation<'_>) -> Result<Installation, StoreError> {
        let updated = self.inner.update(id, mutation).await?;
        self.persist().await?;
        Ok(updated)
    }
}
