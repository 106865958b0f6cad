//! High-level image operations.
//!
//! These functions combine calculations with the codec. They take
//! configuration, compute geometry, and call into [`codec`](super::codec).

use super::backend::{Dimensions, PictureError};
use super::calculations::{MosaicLayout, fit_box_factor};
use super::codec;
use super::params::ScaleMode;
use image::{Rgb, RgbImage, imageops};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, PictureError>;

/// Geometry and styling of a group mosaic.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicConfig {
    pub canvas: Dimensions,
    pub mini: Dimensions,
    pub left_margin: u32,
    pub top_margin: u32,
    pub margin: u32,
    pub background: Rgb<u8>,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            canvas: Dimensions::new(350, 300),
            mini: Dimensions::new(100, 75),
            left_margin: 15,
            top_margin: 65,
            margin: 10,
            background: Rgb([238, 238, 238]),
        }
    }
}

impl MosaicConfig {
    /// Slot layout on a canvas of the given size.
    pub fn layout(&self, canvas: Dimensions) -> MosaicLayout {
        MosaicLayout::new(
            canvas,
            self.mini,
            self.left_margin,
            self.top_margin,
            self.margin,
        )
    }
}

/// Shrink `image` to fit a mosaic slot, never enlarging.
pub fn fit_mini(image: &RgbImage, mini: Dimensions, max_alloc: Option<u64>) -> Result<RgbImage> {
    let factor = fit_box_factor(Dimensions::new(image.width(), image.height()), mini, true);
    codec::scale(image, factor, ScaleMode::Fast, 1, max_alloc)
}

/// Composite `minis` onto a copy of `template`, or onto a blank canvas.
///
/// Minis beyond the layout's capacity are dropped. Returns the canvas and the
/// number of minis actually placed.
pub fn compose_mosaic(
    template: Option<&RgbImage>,
    minis: &[RgbImage],
    config: &MosaicConfig,
    max_alloc: Option<u64>,
) -> Result<(RgbImage, usize)> {
    let mut canvas = match template {
        Some(t) => t.clone(),
        None => {
            codec::ensure_allocatable(config.canvas, max_alloc)?;
            RgbImage::from_pixel(config.canvas.width, config.canvas.height, config.background)
        }
    };
    let layout = config.layout(Dimensions::new(canvas.width(), canvas.height()));

    let mut placed = 0;
    for (index, mini) in minis.iter().take(layout.capacity() as usize).enumerate() {
        let fitted = fit_mini(mini, config.mini, max_alloc)?;
        let (x, y) = layout.placement(
            index as u32,
            Dimensions::new(fitted.width(), fitted.height()),
        );
        imageops::overlay(&mut canvas, &fitted, x, y);
        placed += 1;
    }
    Ok((canvas, placed))
}
