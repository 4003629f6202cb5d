// THEORY:
// Errors are split along the one line that matters to the pipeline: does the
// failure kill a whole source image, or only a single derivative?
//
// 1.  **Source-level** (`FetchError`, `DecodeError`, wrapped as `SourceError`):
//     nothing can be derived from an image we could not read or decode, so the
//     runner records the error and moves on to the next source.
// 2.  **Derivative-level** (`TransformError`, `PersistError`, wrapped as
//     `DerivativeError`): captured in that derivative's `DerivativeResult` and
//     never re-thrown. Sibling derivatives and the other branch keep going.
// 3.  **Run-level** (`LocateError`, `ConfigError`): the run cannot start.

use std::path::PathBuf;
use thiserror::Error;

/// The source bytes could not be obtained.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source {key} not found")]
    NotFound { key: String },

    #[error("invalid source key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("failed to read source {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// The source bytes were fetched but are not a usable raster.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode {key}: {source}")]
    Image {
        key: String,
        #[source]
        source: image::ImageError,
    },

    #[error("{key} decoded to an empty {width}x{height} raster")]
    EmptyRaster { key: String, width: u32, height: u32 },

    #[error("decoder for {key} did not complete: {reason}")]
    Aborted { key: String, reason: String },
}

/// A failure that prevents any derivative of a source image from being attempted.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A blur, resize, pixelation or encode step failed.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{width}x{height} scaled by {factor} overflows the raster dimensions")]
    DimensionOverflow { width: u32, height: u32, factor: u32 },

    #[error("{width}x{height} scaled by {factor} exceeds the {limit} pixel budget")]
    PixelBudget { width: u32, height: u32, factor: u32, limit: u64 },

    #[error("no encoder for extension {ext:?} and no detectable source format")]
    UnsupportedFormat { ext: String },

    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("render task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,
}

/// Encoding succeeded but the artifact could not be stored.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("invalid artifact key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink rejected {key}: {reason}")]
    Rejected { key: String, reason: String },

    #[error("sink panicked while persisting {key}: {message}")]
    Panicked { key: String, message: String },
}

/// Terminal failure for exactly one derivative.
#[derive(Debug, Error)]
pub enum DerivativeError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// The locator could not produce the list of source keys.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed event document: {0}")]
    Event(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source directory {0} does not exist or is not a directory")]
    MissingSource(PathBuf),

    #[error("destination {0} exists and is not a directory")]
    DestinationNotDirectory(PathBuf),

    #[error("invalid key prefix {0:?}")]
    InvalidPrefix(String),
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
