//! File-backed thread store: one pretty-printed JSON file per thread.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use super::{validate_thread_id, StoreError, ThreadStore};
use crate::agent::ThreadState;

#[derive(Debug, Clone)]
pub struct FileThreadStore {
    dir: PathBuf,
}

impl FileThreadStore {
    /// The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, StoreError> {
        validate_thread_id(thread_id)?;
        Ok(self.dir.join(format!("{}.json", thread_id)))
    }
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, StoreError> {
        let path = self.path_for(thread_id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            thread_id: thread_id.to_string(),
            source,
        })?;
        tracing::debug!("Loaded thread {} from {}", thread_id, path.display());
        Ok(Some(state))
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<(), StoreError> {
        let path = self.path_for(thread_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let contents = serde_json::to_string_pretty(state).map_err(|source| StoreError::Corrupt {
            thread_id: thread_id.to_string(),
            source,
        })?;

        // Write next to the target and rename so readers never see a partial file.
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", thread_id, Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!("Saved thread {} to {}", thread_id, path.display());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(thread_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
