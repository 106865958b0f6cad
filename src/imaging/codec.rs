//! Pixel work on top of the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with format sniffing + `Limits` |
//! | Rotate (right angles) | `image::imageops::rotate90` / `rotate180` / `rotate270` |
//! | Rotate (arbitrary) | bilinear resampling into the rotated bounds |
//! | Scale, fast | `image::imageops::resize` with `Nearest`, one step |
//! | Scale, quality | `image::imageops::resize` with `CatmullRom` (bicubic), N steps |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//!
//! Every decoded bitmap is normalised to 8-bit RGB so all later steps work on
//! a single pixel format.

use super::backend::{Dimensions, PictureError};
use super::calculations::{rotated_bounds, scaled_dimensions, step_factor};
use super::params::{Quality, ScaleMode};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, ImageError, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Whether `path` has an extension this build can decode.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
}

/// Fill colour for the corners uncovered by an arbitrary rotation.
const ROTATION_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Check that an RGB bitmap of `dims` can be allocated before doing the work.
///
/// Fails with [`PictureError::OutOfMemory`] if it exceeds `max_alloc` or the
/// allocator refuses the reservation.
pub fn ensure_allocatable(dims: Dimensions, max_alloc: Option<u64>) -> Result<(), PictureError> {
    let bytes = dims.width as u64 * dims.height as u64 * 3;
    if let Some(limit) = max_alloc
        && bytes > limit
    {
        return Err(PictureError::OutOfMemory(format!(
            "{dims} bitmap needs {bytes} bytes, limit is {limit}"
        )));
    }
    let size = usize::try_from(bytes)
        .map_err(|_| PictureError::OutOfMemory(format!("{dims} bitmap exceeds address space")))?;
    let mut probe: Vec<u8> = Vec::new();
    probe
        .try_reserve_exact(size)
        .map_err(|e| PictureError::OutOfMemory(format!("{dims} bitmap: {e}")))?;
    Ok(())
}

/// Decode an encoded image held in memory.
///
/// The format is sniffed from the leading bytes; an unrecognised stream is a
/// decode error. Exceeding `max_alloc` while decoding is reported as
/// [`PictureError::OutOfMemory`].
pub fn decode(bytes: &[u8], max_alloc: Option<u64>) -> Result<RgbImage, PictureError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(PictureError::Decode("unrecognised image format".into()));
    }
    let mut limits = image::Limits::no_limits();
    limits.max_alloc = max_alloc;
    reader.limits(limits);

    let image = reader.decode().map_err(|e| match e {
        ImageError::Limits(limit) => PictureError::OutOfMemory(limit.to_string()),
        ImageError::IoError(io) => PictureError::Io(io),
        other => PictureError::Decode(other.to_string()),
    })?;
    Ok(image.into_rgb8())
}

/// Pixel dimensions from an encoded image's header, without decoding pixels.
pub fn dimensions(bytes: &[u8]) -> Result<Dimensions, PictureError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(PictureError::Decode("unrecognised image format".into()));
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| PictureError::Decode(e.to_string()))?;
    Ok(Dimensions::new(width, height))
}

/// Rotate `image` by `degrees` clockwise about its centre.
///
/// Right angles are exact pixel shuffles. Any other angle resamples into the
/// rotated bounding box with bilinear interpolation.
pub fn rotate(
    image: &RgbImage,
    degrees: f64,
    max_alloc: Option<u64>,
) -> Result<RgbImage, PictureError> {
    let normalized = degrees.rem_euclid(360.0);
    let source = Dimensions::new(image.width(), image.height());
    let bounds = rotated_bounds(source, normalized);
    ensure_allocatable(bounds, max_alloc)?;

    let rotated = match normalized {
        d if d == 0.0 => image.clone(),
        d if d == 90.0 => imageops::rotate90(image),
        d if d == 180.0 => imageops::rotate180(image),
        d if d == 270.0 => imageops::rotate270(image),
        d => rotate_bilinear(image, d, bounds),
    };
    Ok(rotated)
}

fn rotate_bilinear(image: &RgbImage, degrees: f64, bounds: Dimensions) -> RgbImage {
    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();
    let src_cx = image.width() as f64 / 2.0;
    let src_cy = image.height() as f64 / 2.0;
    let dst_cx = bounds.width as f64 / 2.0;
    let dst_cy = bounds.height as f64 / 2.0;

    RgbImage::from_fn(bounds.width, bounds.height, |x, y| {
        // Map the destination pixel centre back into the source
        let dx = x as f64 + 0.5 - dst_cx;
        let dy = y as f64 + 0.5 - dst_cy;
        let sx = dx * cos + dy * sin + src_cx - 0.5;
        let sy = -dx * sin + dy * cos + src_cy - 0.5;
        sample_bilinear(image, sx, sy).unwrap_or(ROTATION_BACKGROUND)
    })
}

fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Option<Rgb<u8>> {
    let (w, h) = (image.width() as f64, image.height() as f64);
    if x < -0.5 || y < -0.5 || x > w - 0.5 || y > h - 0.5 {
        return None;
    }
    let x = x.clamp(0.0, w - 1.0);
    let y = y.clamp(0.0, h - 1.0);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *slot = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Scale `image` by `factor`.
///
/// [`ScaleMode::Fast`] does one nearest-neighbour pass. [`ScaleMode::Quality`]
/// applies `factor^(1/steps)` in `steps` bicubic passes. Each pass probes the
/// allocation first.
pub fn scale(
    image: &RgbImage,
    factor: f64,
    mode: ScaleMode,
    steps: u32,
    max_alloc: Option<u64>,
) -> Result<RgbImage, PictureError> {
    let (filter, steps) = match mode {
        ScaleMode::Fast => (FilterType::Nearest, 1),
        ScaleMode::Quality => (FilterType::CatmullRom, steps.max(1)),
    };
    let per_step = step_factor(factor, steps);

    let mut current: Option<RgbImage> = None;
    for _ in 0..steps {
        let input = current.as_ref().unwrap_or(image);
        let dims = scaled_dimensions(Dimensions::new(input.width(), input.height()), per_step);
        ensure_allocatable(dims, max_alloc)?;
        let next = imageops::resize(input, dims.width, dims.height, filter);
        current = Some(next);
    }
    Ok(current.unwrap_or_else(|| image.clone()))
}

/// Encode `image` as baseline JPEG into `writer`.
pub fn encode_jpeg<W: Write>(
    image: &RgbImage,
    quality: Quality,
    writer: W,
) -> Result<(), PictureError> {
    let encoder = JpegEncoder::new_with_quality(writer, quality.jpeg_quality());
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| match e {
            ImageError::IoError(io) => PictureError::Io(io),
            other => PictureError::Decode(format!("JPEG encode failed: {other}")),
        })
}
