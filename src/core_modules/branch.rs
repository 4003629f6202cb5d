// THEORY:
// A branch is a sequence of derivative *steps* executed one after the other on a
// single task. This module holds what every step has in common:
//
// 1.  **Render off the async threads**: blur, resize and encode are CPU-bound,
//     so each step hands them to the blocking pool, still inside the branch
//     span. A panic in there surfaces as a `JoinError` and is converted into a
//     `TransformError`.
// 2.  **Persist on the branch task**: the encoded buffer moves into the sink.
//     The sink call is guarded with `catch_unwind`, so a misbehaving sink fails
//     only the derivative it was persisting.
// 3.  **Always a result**: `attempt` never returns early and never propagates.
//     Whatever happens, the branch receives one `DerivativeResult` per spec and
//     moves on to the next one.

use crate::core_modules::codec;
use crate::core_modules::derivative::{
    Artifact, DerivativeResult, DerivativeSpec, SourceName, artifact_key,
};
use crate::error::{DerivativeError, PersistError, TransformError, panic_message};
use crate::sink::ArtifactSink;
use crate::source::SourceImage;
use futures::FutureExt;
use image::{GenericImageView, ImageFormat};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Span, debug, info, warn};

/// Everything a branch needs besides the source raster.
#[derive(Clone)]
pub struct BranchContext {
    /// Destination for encoded derivatives.
    pub sink: Arc<dyn ArtifactSink>,
    /// Optional namespace prepended to every output key.
    pub key_prefix: Option<String>,
}

impl BranchContext {
    pub fn new(sink: Arc<dyn ArtifactSink>, key_prefix: Option<String>) -> Self {
        Self { sink, key_prefix }
    }

    pub fn output_key(&self, spec: &DerivativeSpec, name: &SourceName) -> String {
        artifact_key(self.key_prefix.as_deref(), &spec.file_name(name))
    }

    /// A `Failed` result for a step that never got to run.
    pub fn abandoned(&self, spec: DerivativeSpec, name: &SourceName, error: TransformError) -> DerivativeResult {
        DerivativeResult {
            spec,
            output_key: self.output_key(&spec, name),
            outcome: Err(error.into()),
        }
    }
}

struct Rendered {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

/// Produces and persists a single derivative.
pub async fn attempt(ctx: &BranchContext, source: &Arc<SourceImage>, spec: DerivativeSpec) -> DerivativeResult {
    let output_key = ctx.output_key(&spec, &source.name);
    let started = Instant::now();
    let outcome = produce(ctx, source, spec, &output_key).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &outcome {
        Ok(artifact) => info!(
            %output_key,
            width = artifact.width,
            height = artifact.height,
            bytes = artifact.byte_len,
            elapsed_ms,
            "Derivative persisted"
        ),
        Err(error) => warn!(%output_key, %spec, elapsed_ms, %error, "Derivative failed"),
    }

    DerivativeResult {
        spec,
        output_key,
        outcome,
    }
}

async fn produce(
    ctx: &BranchContext,
    source: &Arc<SourceImage>,
    spec: DerivativeSpec,
    output_key: &str,
) -> Result<Artifact, DerivativeError> {
    let format = source.output_format()?;
    let rendered = render(Arc::clone(source), spec, format).await?;
    let artifact = Artifact {
        width: rendered.width,
        height: rendered.height,
        byte_len: rendered.bytes.len(),
        content_type: codec::content_type(format),
    };

    AssertUnwindSafe(ctx.sink.persist(output_key, rendered.bytes, artifact.content_type))
        .catch_unwind()
        .await
        .map_err(|payload| PersistError::Panicked {
            key: output_key.to_string(),
            message: panic_message(payload.as_ref()),
        })??;

    Ok(artifact)
}

async fn render(source: Arc<SourceImage>, spec: DerivativeSpec, format: ImageFormat) -> Result<Rendered, TransformError> {
    on_blocking_pool(move || {
        let raster = spec.render(&source.raster)?;
        let (width, height) = raster.dimensions();
        debug!(%spec, width, height, "Rendered derivative");
        let bytes = codec::encode(&raster, format)?;
        Ok(Rendered { bytes, width, height })
    })
    .await
}

/// Runs `work` on the blocking pool inside the caller's span. A panic or
/// cancellation comes back as a `TransformError`.
async fn on_blocking_pool<T, F>(work: F) -> Result<T, TransformError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransformError> + Send + 'static,
{
    let span = Span::current();
    match tokio::task::spawn_blocking(move || span.in_scope(work)).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            Err(TransformError::Panicked(panic_message(join_err.into_panic().as_ref())))
        }
        Err(_) => Err(TransformError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use image::{DynamicImage, RgbImage};
    use tracing::Instrument;
    use tracing_subscriber::util::SubscriberInitExt;

    fn png_source(width: u32, height: u32) -> Arc<SourceImage> {
        let raster = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7) as u8, (y * 11) as u8, 90])
        }));
        let bytes = codec::encode(&raster, ImageFormat::Png).unwrap();
        Arc::new(SourceImage::decode("shots/frame.png", bytes).unwrap())
    }

    #[tokio::test]
    async fn attempt_persists_under_the_namespaced_key() {
        let sink = Arc::new(MemorySink::new());
        let ctx = BranchContext::new(sink.clone(), Some("processed".into()));

        let result = attempt(&ctx, &png_source(10, 6), DerivativeSpec::Upscale { factor: 2 }).await;

        assert_eq!(result.output_key, "processed/frame_upscale_2x.png");
        let artifact = result.outcome.expect("upscale should succeed");
        assert_eq!((artifact.width, artifact.height), (20, 12));
        assert_eq!(artifact.content_type, "image/png");
        let stored = sink.get("processed/frame_upscale_2x.png").expect("artifact stored");
        assert_eq!(stored.bytes.len(), artifact.byte_len);
    }

    #[tokio::test]
    async fn invalid_spec_fails_without_touching_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let ctx = BranchContext::new(sink.clone(), None);

        let result = attempt(&ctx, &png_source(4, 4), DerivativeSpec::square_pixelation(0)).await;

        assert!(matches!(
            result.failure(),
            Some(DerivativeError::Transform(TransformError::InvalidParameter(_)))
        ));
        assert!(sink.is_empty());
    }

    fn exploding_render() -> Result<Rendered, TransformError> {
        panic!("resampler blew up")
    }

    #[tokio::test]
    async fn render_panic_becomes_a_transform_error() {
        let outcome = on_blocking_pool(exploding_render).await;
        assert!(matches!(
            outcome,
            Err(TransformError::Panicked(msg)) if msg == "resampler blew up"
        ));

        // The pool is still usable afterwards.
        let rendered = on_blocking_pool(|| {
            Ok(Rendered {
                bytes: vec![1, 2, 3],
                width: 1,
                height: 1,
            })
        })
        .await
        .expect("Error rendering after a panic.");
        assert_eq!(rendered.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn blocking_work_runs_inside_the_callers_span() {
        // Blocking threads only see a global subscriber.
        let _ = tracing_subscriber::registry().try_init();
        let span = tracing::info_span!("branch", name = "enhancement");
        let inner = on_blocking_pool(|| Ok(Span::current().id()))
            .instrument(span.clone())
            .await
            .unwrap();
        assert!(inner.is_some());
        assert_eq!(inner, span.id());
    }
}
