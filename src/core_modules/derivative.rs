// THEORY:
// The `derivative` module describes *what* gets produced from a source image,
// with no knowledge of *how* it is scheduled. It is the vocabulary shared by
// both branches and by the pipeline that aggregates their results.
//
// Key architectural principles:
// 1.  **Fixed Manifest**: Every source image yields the same eight derivatives,
//     in the same order, regardless of its content. The manifest is a constant,
//     and each branch owns a contiguous slice of it.
// 2.  **Deterministic Naming**: An output key is a pure function of the source
//     name and the spec. Re-running on the same source overwrites the same keys.
// 3.  **Typed Outcomes**: A `DerivativeResult` carries an explicit `Result`, so
//     callers and tests inspect failures instead of scraping logs.

use crate::core_modules::{enhancement, pixelation};
use crate::error::{DerivativeError, TransformError};
use image::DynamicImage;
use std::fmt;
use std::path::Path;

/// Gaussian sigma used for the blurred derivative.
pub const BLUR_RADIUS: f32 = 5.0;
/// Upscale factors, in production order.
pub const UPSCALE_FACTORS: [u32; 2] = [2, 4];
/// Square pixelation block sizes, finest first.
pub const PIXELATION_BLOCK_SIZES: [u32; 5] = [8, 16, 32, 48, 64];

/// The derivatives produced by the enhancement branch.
pub const ENHANCEMENT_SPECS: [DerivativeSpec; 3] = [
    DerivativeSpec::Blur { radius: BLUR_RADIUS },
    DerivativeSpec::Upscale { factor: UPSCALE_FACTORS[0] },
    DerivativeSpec::Upscale { factor: UPSCALE_FACTORS[1] },
];

/// The derivatives produced by the pixelation branch.
pub const PIXELATION_SPECS: [DerivativeSpec; 5] = [
    DerivativeSpec::square_pixelation(PIXELATION_BLOCK_SIZES[0]),
    DerivativeSpec::square_pixelation(PIXELATION_BLOCK_SIZES[1]),
    DerivativeSpec::square_pixelation(PIXELATION_BLOCK_SIZES[2]),
    DerivativeSpec::square_pixelation(PIXELATION_BLOCK_SIZES[3]),
    DerivativeSpec::square_pixelation(PIXELATION_BLOCK_SIZES[4]),
];

/// Every derivative attempted for one source image, in reporting order.
pub fn manifest() -> impl Iterator<Item = DerivativeSpec> {
    ENHANCEMENT_SPECS.into_iter().chain(PIXELATION_SPECS)
}

/// One transformation applied to a source raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivativeSpec {
    Blur { radius: f32 },
    Upscale { factor: u32 },
    Pixelate { block_width: u32, block_height: u32 },
}

impl DerivativeSpec {
    pub const fn square_pixelation(block_size: u32) -> Self {
        Self::Pixelate {
            block_width: block_size,
            block_height: block_size,
        }
    }

    /// The fragment inserted between the base name and the extension.
    pub fn suffix(&self) -> String {
        match self {
            Self::Blur { .. } => "_blurred".to_string(),
            Self::Upscale { factor } => format!("_upscale_{factor}x"),
            Self::Pixelate {
                block_width,
                block_height,
            } => format!("_pixelated-{block_width}x{block_height}"),
        }
    }

    /// `<base><suffix><ext>`
    pub fn file_name(&self, name: &SourceName) -> String {
        format!("{}{}{}", name.base, self.suffix(), name.ext)
    }

    /// Applies the transformation to `raster`, returning a new raster.
    pub fn render(&self, raster: &DynamicImage) -> Result<DynamicImage, TransformError> {
        match *self {
            Self::Blur { radius } => enhancement::blur(raster, radius),
            Self::Upscale { factor } => enhancement::upscale(raster, factor),
            Self::Pixelate {
                block_width,
                block_height,
            } => pixelation::pixelate(raster, block_width, block_height),
        }
    }
}

impl fmt::Display for DerivativeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blur { radius } => write!(f, "blur(radius={radius})"),
            Self::Upscale { factor } => write!(f, "upscale({factor}x)"),
            Self::Pixelate {
                block_width,
                block_height,
            } => write!(f, "pixelate({block_width}x{block_height})"),
        }
    }
}

/// The naming components of a source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceName {
    /// The file name without its extension.
    pub base: String,
    /// The lower-cased extension including its leading dot, or empty.
    pub ext: String,
}

impl SourceName {
    pub fn from_key(key: &str) -> Self {
        let file_name = Path::new(key)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());

        match Path::new(&file_name).extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy();
                let base = file_name[..file_name.len() - ext.len() - 1].to_string();
                Self {
                    base,
                    ext: format!(".{}", ext.to_lowercase()),
                }
            }
            None => Self {
                base: file_name,
                ext: String::new(),
            },
        }
    }

    /// The extension without its leading dot.
    pub fn bare_ext(&self) -> &str {
        self.ext.trim_start_matches('.')
    }
}

/// Joins an optional namespace and a file name into an artifact key.
pub fn artifact_key(prefix: Option<&str>, file_name: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{file_name}"),
        None => file_name.to_string(),
    }
}

/// What a successful derivative left in the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
    pub content_type: &'static str,
}

/// The outcome of attempting one derivative. Created once, never mutated.
#[derive(Debug)]
pub struct DerivativeResult {
    pub spec: DerivativeSpec,
    pub output_key: String,
    pub outcome: Result<Artifact, DerivativeError>,
}

impl DerivativeResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure(&self) -> Option<&DerivativeError> {
        self.outcome.as_ref().err()
    }
}
