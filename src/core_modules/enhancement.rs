// THEORY:
// The enhancement branch produces the "smooth" derivatives: one blurred copy and
// a ladder of upscaled copies. Each step starts again from the *original*
// raster; the upscales are never derived from the blurred image, and a failed
// step leaves nothing behind that a later step could depend on.

use crate::core_modules::branch::{BranchContext, attempt};
use crate::core_modules::derivative::{DerivativeResult, ENHANCEMENT_SPECS};
use crate::error::TransformError;
use crate::source::SourceImage;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;

/// High-quality filter for enlarging.
pub const UPSCALE_FILTER: FilterType = FilterType::Lanczos3;

/// Largest upscaled raster, in pixels. The resampler holds a float copy of the
/// target, so this keeps a single step well under a few GB.
pub const MAX_UPSCALE_PIXELS: u64 = 1 << 28;

/// Gaussian blur with the given sigma. Dimensions are preserved.
pub fn blur(raster: &DynamicImage, radius: f32) -> Result<DynamicImage, TransformError> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(TransformError::InvalidParameter(format!("blur radius {radius}")));
    }
    Ok(raster.blur(radius))
}

/// Resizes to exactly `factor` times each dimension.
pub fn upscale(raster: &DynamicImage, factor: u32) -> Result<DynamicImage, TransformError> {
    if factor == 0 {
        return Err(TransformError::InvalidParameter("upscale factor 0".to_string()));
    }
    let (width, height) = raster.dimensions();
    let overflow = || TransformError::DimensionOverflow { width, height, factor };
    let target_width = width.checked_mul(factor).ok_or_else(overflow)?;
    let target_height = height.checked_mul(factor).ok_or_else(overflow)?;
    if u64::from(target_width) * u64::from(target_height) > MAX_UPSCALE_PIXELS {
        return Err(TransformError::PixelBudget {
            width,
            height,
            factor,
            limit: MAX_UPSCALE_PIXELS,
        });
    }

    Ok(raster.resize_exact(target_width, target_height, UPSCALE_FILTER))
}

/// Blur, then each upscale factor, sequentially on the calling task.
pub struct EnhancementBranch {
    ctx: BranchContext,
}

impl EnhancementBranch {
    pub fn new(ctx: BranchContext) -> Self {
        Self { ctx }
    }

    /// Always returns one result per entry of `ENHANCEMENT_SPECS`, in order.
    pub async fn run(self, source: Arc<SourceImage>) -> Vec<DerivativeResult> {
        let mut results = Vec::with_capacity(ENHANCEMENT_SPECS.len());
        for spec in ENHANCEMENT_SPECS {
            results.push(attempt(&self.ctx, &source, spec).await);
        }
        results
    }
}
