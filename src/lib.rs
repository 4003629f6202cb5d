// THEORY:
// This file is the main entry point for the `pixlflow` library crate. It defines
// the public API used by the `pixlflow` binary and by anyone embedding the
// engine with their own storage.
//
// The public surface is small: a `PipelineRunner` that walks the sources, a
// `DerivativePipeline` that turns one source image into its eight derivatives,
// and the `SourceLocator` / `SourceFetcher` / `ArtifactSink` traits that plug in
// storage. The image transforms and the per-derivative step machinery live in
// `core_modules` and are reached through those types.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod sink;
pub mod source;

pub use config::{DEFAULT_KEY_PREFIX, PipelineConfig, Trigger};
pub use core_modules::derivative::{DerivativeResult, DerivativeSpec, SourceName};
pub use error::{DerivativeError, PersistError, SourceError, TransformError};
pub use pipeline::{DerivativePipeline, PipelineOutcome};
pub use runner::{PipelineRunner, RunReport};
pub use sink::{ArtifactSink, LocalDirectorySink, MemorySink};
pub use source::{DirectoryScan, EventLocator, LocalDirectorySource, SourceFetcher, SourceImage, SourceLocator};
