//! Source side of the pipeline: which images to process, and how to read them.
//!
//! The runner only talks to the [`SourceLocator`] and [`SourceFetcher`] traits.
//! The implementations here work on a local directory; a remote object store
//! plugs in by implementing the same traits.

use crate::core_modules::codec;
use crate::core_modules::derivative::SourceName;
use crate::error::{DecodeError, FetchError, LocateError, TransformError, panic_message};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// A fetched and decoded source image. Read-only once built.
pub struct SourceImage {
    /// The key the image was fetched under.
    pub key: String,
    /// Base name and extension used to derive output keys.
    pub name: SourceName,
    /// The raw bytes as fetched.
    pub bytes: Vec<u8>,
    /// The decoded raster both branches read from.
    pub raster: DynamicImage,
    pub width: u32,
    pub height: u32,
    /// The container format detected from the bytes, if any.
    pub format: Option<ImageFormat>,
}

impl SourceImage {
    /// Decodes `bytes`, guessing the format from their content.
    pub fn decode(key: impl Into<String>, bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let key = key.into();
        let format = image::guess_format(&bytes).ok();
        let raster = image::load_from_memory(&bytes).map_err(|source| DecodeError::Image {
            key: key.clone(),
            source,
        })?;
        let (width, height) = raster.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::EmptyRaster { key, width, height });
        }

        Ok(Self {
            name: SourceName::from_key(&key),
            key,
            bytes,
            raster,
            width,
            height,
            format,
        })
    }

    /// Decodes on the blocking pool.
    pub async fn decode_blocking(key: String, bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let task_key = key.clone();
        match tokio::task::spawn_blocking(move || Self::decode(task_key, bytes)).await {
            Ok(decoded) => decoded,
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err.into_panic().as_ref())
                } else {
                    "cancelled".to_string()
                };
                Err(DecodeError::Aborted { key, reason })
            }
        }
    }

    /// The format every derivative of this image is encoded in.
    pub fn output_format(&self) -> Result<ImageFormat, TransformError> {
        codec::output_format(self.name.bare_ext(), self.format)
    }
}

impl std::fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceImage")
            .field("key", &self.key)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Resolves a source key to its raw bytes.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError>;
}

/// Yields the keys of the source images to process.
#[async_trait]
pub trait SourceLocator: Send + Sync {
    async fn locate(&self) -> Result<Vec<String>, LocateError>;
}

/// Maps a relative key onto `root`, refusing anything that could escape it.
pub(crate) fn resolve_key(root: &Path, key: &str) -> Result<PathBuf, &'static str> {
    if key.is_empty() {
        return Err("empty key");
    }
    let relative = Path::new(key);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err("parent directory reference"),
            Component::RootDir | Component::Prefix(_) => return Err("absolute path"),
        }
    }
    Ok(root.join(relative))
}

/// Reads sources from a local directory.
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceFetcher for LocalDirectorySource {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let path = resolve_key(&self.root, key).map_err(|reason| FetchError::InvalidKey {
            key: key.to_string(),
            reason,
        })?;
        debug!(key, path = %path.display(), "Fetching source");

        tokio::fs::read(&path).await.map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound { key: key.to_string() },
            _ => FetchError::Io {
                key: key.to_string(),
                source,
            },
        })
    }
}

/// Enumerates the regular files directly inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryScan {
    root: PathBuf,
}

impl DirectoryScan {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceLocator for DirectoryScan {
    async fn locate(&self) -> Result<Vec<String>, LocateError> {
        let scan_err = |source: std::io::Error| LocateError::Scan {
            path: self.root.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(scan_err)?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
            let file_type = entry.file_type().await.map_err(scan_err)?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => keys.push(name),
                Err(name) => warn!(?name, "Skipping source with a non UTF-8 name"),
            }
        }

        // read_dir order is filesystem-dependent; sort so reports are stable.
        keys.sort();
        Ok(keys)
    }
}

/// The keys carried by a trigger notification.
#[derive(Debug, Clone, Default)]
pub struct EventLocator {
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EventDocument {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    s3: EventEntity,
}

#[derive(Debug, Deserialize)]
struct EventEntity {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    key: String,
}

impl EventLocator {
    pub fn single(key: impl Into<String>) -> Self {
        Self { keys: vec![key.into()] }
    }

    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Parses an S3-style object notification, keeping record order.
    pub fn from_event_json(document: &str) -> Result<Self, LocateError> {
        let event: EventDocument = serde_json::from_str(document)?;
        Ok(Self::from_keys(event.records.into_iter().map(|r| r.s3.object.key)))
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

#[async_trait]
impl SourceLocator for EventLocator {
    async fn locate(&self) -> Result<Vec<String>, LocateError> {
        Ok(self.keys.clone())
    }
}
