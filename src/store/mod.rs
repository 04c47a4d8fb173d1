//! Thread checkpoint storage.
//!
//! The control loop never touches a store. Callers load a [`ThreadState`] by
//! thread id, run a task against it and save it back.

mod file;
mod memory;

pub use file::FileThreadStore;
pub use memory::InMemoryThreadStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::agent::ThreadState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid thread id {0:?}: use letters, digits, '-', '_' or '.'")]
    InvalidThreadId(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored thread {thread_id} is corrupt: {source}")]
    Corrupt {
        thread_id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    fn is_persistent(&self) -> bool;

    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, StoreError>;

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<(), StoreError>;

    /// Returns whether anything was removed.
    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError>;
}

pub(crate) fn validate_thread_id(thread_id: &str) -> Result<(), StoreError> {
    let valid = !thread_id.is_empty()
        && thread_id != "."
        && thread_id != ".."
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidThreadId(thread_id.to_string()))
    }
}
