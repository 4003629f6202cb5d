// THEORY:
// The runner is the outer loop: it asks the locator which sources exist, then
// drives them through the pipeline one at a time. Concurrency lives *inside* an
// image (two branches), never *across* images; each image's fan-out/join is
// complete before the next fetch starts.
//
// A source that cannot be fetched or decoded is recorded as a skipped outcome
// and the loop carries on. The only error that ends a run is the locator
// failing to produce the key list in the first place.

use crate::error::{LocateError, SourceError};
use crate::pipeline::{DerivativePipeline, PipelineOutcome};
use crate::source::{SourceFetcher, SourceImage, SourceLocator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, info, info_span, warn};

/// Every outcome of one run, in processing order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<PipelineOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Sources that reached fan-out.
    pub fn processed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.source_error.is_none()).count()
    }

    /// Sources dropped at fetch or decode.
    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.processed()
    }

    pub fn derivatives_succeeded(&self) -> usize {
        self.outcomes.iter().map(PipelineOutcome::succeeded).sum()
    }

    pub fn derivatives_failed(&self) -> usize {
        self.outcomes.iter().map(PipelineOutcome::failed).sum()
    }

    /// True when every source was processed and every derivative persisted.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(PipelineOutcome::is_complete)
    }

    pub fn outcome_for(&self, source_key: &str) -> Option<&PipelineOutcome> {
        self.outcomes.iter().find(|o| o.source_key == source_key)
    }
}

/// Drives every located source through the derivative pipeline, sequentially.
pub struct PipelineRunner {
    locator: Arc<dyn SourceLocator>,
    fetcher: Arc<dyn SourceFetcher>,
    pipeline: DerivativePipeline,
}

impl PipelineRunner {
    pub fn new(
        locator: Arc<dyn SourceLocator>,
        fetcher: Arc<dyn SourceFetcher>,
        pipeline: DerivativePipeline,
    ) -> Self {
        Self {
            locator,
            fetcher,
            pipeline,
        }
    }

    pub async fn run(&self) -> Result<RunReport, LocateError> {
        let started = Instant::now();
        let keys = self.locator.locate().await?;
        info!(sources = keys.len(), "Located sources");

        let mut report = RunReport::default();
        for key in keys {
            let span = info_span!("source", key = %key);
            let outcome = self.process(key).instrument(span).await;
            report.outcomes.push(outcome);
        }
        report.elapsed = started.elapsed();

        info!(
            processed = report.processed(),
            skipped = report.skipped(),
            succeeded = report.derivatives_succeeded(),
            failed = report.derivatives_failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }

    /// Fetches, decodes and fans out a single source.
    pub async fn process(&self, key: String) -> PipelineOutcome {
        let started = Instant::now();
        info!("Processing source");

        let source = match self.load(&key).await {
            Ok(source) => source,
            Err(error) => {
                warn!(%error, "Skipping source");
                return PipelineOutcome::skipped(key, error, started.elapsed());
            }
        };

        let outcome = self.pipeline.run(source).await;
        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Source finished"
        );
        outcome
    }

    async fn load(&self, key: &str) -> Result<SourceImage, SourceError> {
        let bytes = self.fetcher.fetch(key).await?;
        Ok(SourceImage::decode_blocking(key.to_string(), bytes).await?)
    }
}
