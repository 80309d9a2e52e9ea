//! JSON-file backed aggregate. The whole document is read, extended, and
//! rewritten for every append while the store lock is held.

use super::{AggregateStore, StoreError, StoreFuture};
use crate::fetch::Payload;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const DEFAULT_FILE_NAME: &str = "aggregate.json";

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    staging_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let staging_path = staging_path_for(&path);
        Self {
            path,
            staging_path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Vec<Payload>, StoreError> {
        let bytes = fs::read(&self.path)
            .await
            .map_err(|err| StoreError::io("read", &self.path, err))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes the full document to a staging file and renames it over the
    /// aggregate, so readers only ever see a complete document.
    async fn write_entries(&self, entries: &[Payload]) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(entries).map_err(StoreError::Encode)?;

        if let Err(err) = self.write_staging(&encoded).await {
            let _ = fs::remove_file(&self.staging_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&self.staging_path, &self.path).await {
            let _ = fs::remove_file(&self.staging_path).await;
            return Err(StoreError::io("replace", &self.path, err));
        }
        Ok(())
    }

    async fn write_staging(&self, encoded: &[u8]) -> Result<(), StoreError> {
        let mut file = fs::File::create(&self.staging_path)
            .await
            .map_err(|err| StoreError::io("create staging file for", &self.path, err))?;
        file.write_all(encoded)
            .await
            .map_err(|err| StoreError::io("write", &self.path, err))?;
        file.sync_all()
            .await
            .map_err(|err| StoreError::io("sync", &self.path, err))
    }
}

impl AggregateStore for JsonFileStore {
    fn reset(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|err| StoreError::io("create directory for", &self.path, err))?;
                }
            }
            self.write_entries(&[]).await?;
            tracing::debug!(path = %self.path.display(), "aggregate reset");
            Ok(())
        })
    }

    fn append(&self, payload: Payload) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.read_entries().await?;
            entries.push(payload);
            self.write_entries(&entries).await?;
            Ok(entries.len())
        })
    }

    fn size(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            Ok(self.read_entries().await?.len())
        })
    }

    fn load(&self) -> StoreFuture<'_, Vec<Payload>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            self.read_entries().await
        })
    }
}

fn staging_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from(DEFAULT_FILE_NAME));
    name.push(".tmp");
    path.with_file_name(name)
}
