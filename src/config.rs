//! Run configuration and collaborator wiring.

use crate::error::ConfigError;
use crate::pipeline::DerivativePipeline;
use crate::runner::PipelineRunner;
use crate::sink::{ArtifactSink, LocalDirectorySink};
use crate::source::{DirectoryScan, EventLocator, LocalDirectorySource, SourceLocator};
use std::path::PathBuf;
use std::sync::Arc;

/// Conventional namespace for derivatives stored next to unrelated objects.
pub const DEFAULT_KEY_PREFIX: &str = "processed";

/// Where sources come from and where derivatives go.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory the source keys resolve against.
    pub source_dir: PathBuf,
    /// Directory derivatives are written below. Created if missing.
    pub dest_dir: PathBuf,
    /// Optional namespace for every output key.
    pub key_prefix: Option<String>,
}

/// Which sources a run covers.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every regular file directly inside the source directory.
    DirectoryScan,
    /// Exactly these keys, as delivered by a notification.
    Event(EventLocator),
}

impl PipelineConfig {
    pub fn new(source_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
            key_prefix: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source_dir.is_dir() {
            return Err(ConfigError::MissingSource(self.source_dir.clone()));
        }
        if self.dest_dir.exists() && !self.dest_dir.is_dir() {
            return Err(ConfigError::DestinationNotDirectory(self.dest_dir.clone()));
        }
        if let Some(prefix) = &self.key_prefix {
            let trimmed = prefix.trim_matches('/');
            if trimmed.is_empty() || trimmed.split('/').any(|part| part.is_empty() || part == "..") {
                return Err(ConfigError::InvalidPrefix(prefix.clone()));
            }
        }
        Ok(())
    }

    /// The pipeline for this configuration, persisting into `sink`.
    pub fn pipeline(&self, sink: Arc<dyn ArtifactSink>) -> DerivativePipeline {
        let pipeline = DerivativePipeline::new(sink);
        match &self.key_prefix {
            Some(prefix) => pipeline.with_key_prefix(prefix.clone()),
            None => pipeline,
        }
    }

    /// A runner over the local source and destination directories.
    pub fn runner(&self, trigger: Trigger) -> Result<PipelineRunner, ConfigError> {
        self.validate()?;
        let sink = Arc::new(LocalDirectorySink::new(&self.dest_dir));
        Ok(self.runner_with_sink(trigger, sink))
    }

    /// A runner over the local source directory persisting into any sink.
    pub fn runner_with_sink(&self, trigger: Trigger, sink: Arc<dyn ArtifactSink>) -> PipelineRunner {
        let locator: Arc<dyn SourceLocator> = match trigger {
            Trigger::DirectoryScan => Arc::new(DirectoryScan::new(&self.source_dir)),
            Trigger::Event(locator) => Arc::new(locator),
        };
        PipelineRunner::new(
            locator,
            Arc::new(LocalDirectorySource::new(&self.source_dir)),
            self.pipeline(sink),
        )
    }
}
