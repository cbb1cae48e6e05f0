//! Raster helpers for vision-model payloads.
//!
//! Reasoning gateways cap inline image sizes, so context images are
//! downscaled and re-encoded as JPEG before transmission. Lossless inputs
//! that already fit the byte budget are forwarded untouched.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ImageOpError {
    #[error("failed to decode image: {0}")]
    #[diagnostic(code(pixelsmith::images::decode))]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    #[diagnostic(code(pixelsmith::images::encode))]
    Encode(#[source] image::ImageError),
}

/// Best-effort MIME sniff from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Downscale to at most `max_dimension` on the long edge and re-encode as
/// JPEG at the given quality. Used for enhancer context images where token
/// cost matters more than fidelity.
pub fn resize_for_context(
    bytes: &[u8],
    max_dimension: u32,
    quality: u8,
) -> Result<Vec<u8>, ImageOpError> {
    let decoded = image::load_from_memory(bytes).map_err(ImageOpError::Decode)?;
    let scaled = if decoded.width() > max_dimension || decoded.height() > max_dimension {
        decoded.thumbnail(max_dimension, max_dimension)
    } else {
        decoded
    };
    encode_jpeg(&scaled, quality)
}

/// Shrink an image under `max_bytes` for transmission, preserving the
/// original encoding when it already fits.
///
/// Returns the (possibly re-encoded) bytes and their MIME type.
pub fn fit_within_budget(
    bytes: &[u8],
    max_bytes: usize,
    max_dimension: u32,
    quality: u8,
) -> Result<(Vec<u8>, &'static str), ImageOpError> {
    if bytes.len() <= max_bytes {
        return Ok((bytes.to_vec(), sniff_mime(bytes)));
    }
    tracing::debug!(
        size_kb = bytes.len() / 1024,
        budget_kb = max_bytes / 1024,
        "image over byte budget, downscaling"
    );
    let reencoded = resize_for_context(bytes, max_dimension, quality)?;
    Ok((reencoded, "image/jpeg"))
}

fn encode_jpeg(img: &image::DynamicImage, quality: u8) -> Result<Vec<u8>, ImageOpError> {
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode_image(&rgb).map_err(ImageOpError::Encode)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn sniffs_png_and_jpeg() {
        let png = sample_png(8, 8);
        assert_eq!(sniff_mime(&png), "image/png");
        let jpeg = resize_for_context(&png, 8, 80).unwrap();
        assert_eq!(sniff_mime(&jpeg), "image/jpeg");
    }

    #[test]
    fn resize_caps_long_edge() {
        let png = sample_png(640, 320);
        let jpeg = resize_for_context(&png, 64, 70).unwrap();
        let reloaded = image::load_from_memory(&jpeg).unwrap();
        assert!(reloaded.width() <= 64 && reloaded.height() <= 64);
    }

    #[test]
    fn small_images_keep_their_encoding() {
        let png = sample_png(16, 16);
        let (bytes, mime) = fit_within_budget(&png, 1024 * 1024, 2048, 85).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, png);
    }

    #[test]
    fn oversized_images_are_reencoded() {
        let png = sample_png(512, 512);
        let budget = 1024; // force the downscale path
        let (bytes, mime) = fit_within_budget(&png, budget, 128, 60).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert!(bytes.len() < png.len());
    }
}
