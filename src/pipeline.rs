// THEORY:
// The `pipeline` module is the top-level API for turning one source image into
// its full set of derivatives. It owns no image logic of its own; its job is
// coordination.
//
// Key architectural principles:
// 1.  **Fan-out**: Exactly two tasks are spawned per image, one per branch, and
//     both hold the same read-only `Arc<SourceImage>`. There is no shared mutable
//     state between them, so no locking.
// 2.  **Barrier**: `run` awaits both tasks before returning. Nothing about one
//     image outlives its call to `run`.
// 3.  **Deterministic aggregation**: Enhancement results always come first, then
//     pixelation results, whichever branch finishes first.
// 4.  **Containment**: Step-level failures (including panics) are already
//     `Failed` results by the time a branch returns. If a branch task still
//     dies, its whole slice of the manifest is reported as failed; the
//     sibling's results are kept.

use crate::core_modules::branch::BranchContext;
use crate::core_modules::derivative::{
    DerivativeResult, DerivativeSpec, ENHANCEMENT_SPECS, PIXELATION_SPECS, SourceName,
};
use crate::core_modules::enhancement::EnhancementBranch;
use crate::core_modules::pixelation::PixelationBranch;
use crate::error::{SourceError, TransformError, panic_message};
use crate::sink::ArtifactSink;
use crate::source::SourceImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{Instrument, error, info_span};

// Re-export the per-derivative vocabulary for the public API.
pub use crate::core_modules::derivative::{Artifact, manifest};

/// Everything that happened to one source image.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub source_key: String,
    /// One entry per manifest spec, in manifest order. Empty when the source
    /// could not be fetched or decoded.
    pub results: Vec<DerivativeResult>,
    /// Why no derivative was attempted, if that is the case.
    pub source_error: Option<SourceError>,
    pub elapsed: Duration,
}

impl PipelineOutcome {
    /// An outcome for a source that never reached fan-out.
    pub fn skipped(source_key: impl Into<String>, error: SourceError, elapsed: Duration) -> Self {
        Self {
            source_key: source_key.into(),
            results: Vec::new(),
            source_error: Some(error),
            elapsed,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// True when every derivative was persisted.
    pub fn is_complete(&self) -> bool {
        self.source_error.is_none() && !self.results.is_empty() && self.failed() == 0
    }

    pub fn result_for(&self, spec: &DerivativeSpec) -> Option<&DerivativeResult> {
        self.results.iter().find(|r| r.spec == *spec)
    }
}

/// Fans one source image out into the enhancement and pixelation branches.
#[derive(Clone)]
pub struct DerivativePipeline {
    ctx: BranchContext,
}

impl DerivativePipeline {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            ctx: BranchContext::new(sink, None),
        }
    }

    /// Namespaces every output key, e.g. `processed/cat_blurred.jpg`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ctx.key_prefix = Some(prefix.into());
        self
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.ctx.key_prefix.as_deref()
    }

    pub async fn run(&self, source: SourceImage) -> PipelineOutcome {
        let started = Instant::now();
        let source = Arc::new(source);
        let name = source.name.clone();

        let enhancement = tokio::spawn(
            EnhancementBranch::new(self.ctx.clone())
                .run(Arc::clone(&source))
                .instrument(info_span!("branch", name = "enhancement")),
        );
        let pixelation = tokio::spawn(
            PixelationBranch::new(self.ctx.clone())
                .run(Arc::clone(&source))
                .instrument(info_span!("branch", name = "pixelation")),
        );

        let (enhancement, pixelation) = tokio::join!(enhancement, pixelation);

        let mut results = Vec::with_capacity(ENHANCEMENT_SPECS.len() + PIXELATION_SPECS.len());
        results.extend(self.settle("enhancement", &ENHANCEMENT_SPECS, &name, enhancement));
        results.extend(self.settle("pixelation", &PIXELATION_SPECS, &name, pixelation));

        PipelineOutcome {
            source_key: source.key.clone(),
            results,
            source_error: None,
            elapsed: started.elapsed(),
        }
    }

    fn settle(
        &self,
        branch: &'static str,
        specs: &[DerivativeSpec],
        name: &SourceName,
        joined: Result<Vec<DerivativeResult>, JoinError>,
    ) -> Vec<DerivativeResult> {
        let join_err = match joined {
            Ok(results) => return results,
            Err(join_err) => join_err,
        };

        error!(branch, error = %join_err, "Branch task died");
        let panic = join_err
            .is_panic()
            .then(|| panic_message(join_err.into_panic().as_ref()));
        specs
            .iter()
            .map(|spec| {
                let error = match &panic {
                    Some(message) => TransformError::Panicked(message.clone()),
                    None => TransformError::Cancelled,
                };
                self.ctx.abandoned(*spec, name, error)
            })
            .collect()
    }
}
