// THEORY:
// Pixelation is done by throwing resolution away and then blowing the survivors
// back up without interpolation. The raster is first shrunk to one pixel per
// block, so that pixel stands for the whole block's colour, and then enlarged
// to the original size with nearest-neighbour sampling. Each surviving pixel
// becomes a flat square and the image turns blocky.
//
// Key architectural principles:
// 1.  **Grid Math**: The downsized grid is `width / block_width` by
//     `height / block_height`, the same integer division used to lay a chunk
//     grid over a frame. Partial blocks at the right/bottom edge are absorbed by
//     the resampler.
// 2.  **Clamping**: A block larger than the image would produce a 0-wide grid,
//     which no resampler accepts. Each grid dimension is clamped to at least 1,
//     so a 4x4 image pixelated with 64x64 blocks becomes a single flat colour.
// 3.  **Shape Preservation**: The output always has the source's dimensions;
//     only the level of detail changes.

use crate::core_modules::branch::{BranchContext, attempt};
use crate::core_modules::derivative::{DerivativeResult, PIXELATION_SPECS};
use crate::error::TransformError;
use crate::source::SourceImage;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use tracing::debug;

/// Cheap averaging filter for shrinking to the block grid.
pub const DOWNSAMPLE_FILTER: FilterType = FilterType::Triangle;
/// No interpolation when enlarging, so blocks keep hard edges.
pub const UPSAMPLE_FILTER: FilterType = FilterType::Nearest;

/// The block-grid dimensions for a raster, each clamped to at least 1.
pub fn downsized_dimensions(
    width: u32,
    height: u32,
    block_width: u32,
    block_height: u32,
) -> Result<(u32, u32), TransformError> {
    if block_width == 0 || block_height == 0 {
        return Err(TransformError::InvalidParameter(format!(
            "pixelation block {block_width}x{block_height}"
        )));
    }
    Ok(((width / block_width).max(1), (height / block_height).max(1)))
}

/// Down-up resample producing a blocky raster of the original size.
pub fn pixelate(raster: &DynamicImage, block_width: u32, block_height: u32) -> Result<DynamicImage, TransformError> {
    let (width, height) = raster.dimensions();
    let (grid_width, grid_height) = downsized_dimensions(width, height, block_width, block_height)?;
    debug!(width, height, grid_width, grid_height, "Pixelation grid");

    let grid = raster.resize_exact(grid_width, grid_height, DOWNSAMPLE_FILTER);
    Ok(grid.resize_exact(width, height, UPSAMPLE_FILTER))
}

/// Each block size in turn, sequentially on the calling task.
pub struct PixelationBranch {
    ctx: BranchContext,
}

impl PixelationBranch {
    pub fn new(ctx: BranchContext) -> Self {
        Self { ctx }
    }

    /// Always returns one result per entry of `PIXELATION_SPECS`, in order.
    pub async fn run(self, source: Arc<SourceImage>) -> Vec<DerivativeResult> {
        let mut results = Vec::with_capacity(PIXELATION_SPECS.len());
        for spec in PIXELATION_SPECS {
            results.push(attempt(&self.ctx, &source, spec).await);
        }
        results
    }
}
