//! Destination side of the pipeline.
//!
//! Both branches persist through the same [`ArtifactSink`] at the same time, so
//! implementations must be `Send + Sync`. The branches never write the same
//! key, and re-persisting a key overwrites it; there is no versioning.

use crate::error::PersistError;
use crate::source::resolve_key;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Stores encoded derivatives under their output keys.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), PersistError>;
}

/// Writes artifacts below a local directory.
///
/// Each write goes to a temporary file next to its target and is renamed into
/// place, so readers never observe a half-written artifact. If the rename does
/// not happen the temporary file is removed when it drops.
#[derive(Debug, Clone)]
pub struct LocalDirectorySink {
    root: PathBuf,
}

impl LocalDirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), PersistError> {
        let io_err = |source: std::io::Error| PersistError::Io {
            path: target.to_path_buf(),
            source,
        };
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let mut scratch = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        scratch.write_all(bytes).map_err(io_err)?;
        scratch.as_file().sync_all().map_err(io_err)?;
        scratch.persist(target).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactSink for LocalDirectorySink {
    async fn persist(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), PersistError> {
        let target = resolve_key(&self.root, key).map_err(|reason| PersistError::InvalidKey {
            key: key.to_string(),
            reason,
        })?;
        debug!(key, content_type, path = %target.display(), "Writing artifact");

        let write_target = target.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&write_target, &bytes))
            .await
            .map_err(|join_err| PersistError::Rejected {
                key: key.to_string(),
                reason: format!("writer task failed: {join_err}"),
            })?
    }
}

/// An artifact held by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps artifacts in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<BTreeMap<String, StoredArtifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredArtifact>> {
        // A panic while holding the lock cannot leave a half-inserted entry.
        self.artifacts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<StoredArtifact> {
        self.lock().get(key).cloned()
    }

    /// Stored keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().values().map(|a| a.bytes.len()).sum()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn persist(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), PersistError> {
        self.lock().insert(
            key.to_string(),
            StoredArtifact {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
