//! Shared test utilities for the picture-pipeline test suite.
//!
//! Synthetic images are generated in memory, so no binary fixtures are needed.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! let original = write_test_jpeg(tmp.path(), "a.jpg", 640, 480);
//! set_mtime(&original, 1_000);
//! ```

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

// =========================================================================
// Synthetic images
// =========================================================================

/// A gradient so encoders have some structure to work with.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Encoded JPEG bytes of a `width x height` gradient.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&gradient(width, height))
        .unwrap();
    buf
}

/// Write a gradient JPEG to `dir/name` and return its path.
pub fn write_test_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, jpeg_bytes(width, height)).unwrap();
    path
}

// =========================================================================
// Timestamps
// =========================================================================

/// Set a file's modification time to `secs` after the Unix epoch.
pub fn set_mtime(path: &Path, secs: i64) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(secs, 0)).unwrap();
}

/// Pixel dimensions of an image file on disk.
pub fn image_size(path: &Path) -> (u32, u32) {
    image::image_dimensions(path).unwrap()
}
