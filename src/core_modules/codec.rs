// THEORY:
// Every derivative is encoded in the same format as its source file name
// promises: `cat.png` produces PNG derivatives, `cat.jpg` JPEG ones. The
// extension wins because the artifact keys carry it and the local sink relies
// on it for content-type inference; the detected source format is only the
// fallback for extension-less keys.

use crate::error::TransformError;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Picks the encode format for a source's derivatives.
pub fn output_format(ext: &str, detected: Option<ImageFormat>) -> Result<ImageFormat, TransformError> {
    ImageFormat::from_extension(ext)
        .or(detected)
        .ok_or_else(|| TransformError::UnsupportedFormat { ext: ext.to_string() })
}

/// The MIME type handed to sinks alongside the encoded bytes.
pub fn content_type(format: ImageFormat) -> &'static str {
    format.to_mime_type()
}

/// Encodes `raster` into a fresh buffer. The buffer is owned by the caller's
/// step and dropped with it, whether the step succeeds or not.
pub fn encode(raster: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel and no 16-bit samples.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(raster.to_rgb8()).write_to(&mut buffer, format)?,
        _ => raster.write_to(&mut buffer, format)?,
    }
    Ok(buffer.into_inner())
}
