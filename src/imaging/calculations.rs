//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;

/// Smallest edge an intermediate scaling step may collapse to.
pub const MIN_STEP_EDGE: u32 = 100;

/// Calculate the factor that fits `source` inside `target`.
///
/// Picks whichever axis is more constrained, i.e. `min(h / src_h, w / src_w)`.
/// With `dont_enlarge`, factors above 1 are clamped to 1.
///
/// # Examples
/// ```
/// # use picture_pipeline::imaging::calculations::fit_box_factor;
/// # use picture_pipeline::imaging::Dimensions;
/// // 3000x2000 into 300x200 → 0.1
/// let f = fit_box_factor(Dimensions::new(3000, 2000), Dimensions::new(300, 200), false);
/// assert!((f - 0.1).abs() < 1e-9);
/// ```
pub fn fit_box_factor(source: Dimensions, target: Dimensions, dont_enlarge: bool) -> f64 {
    if source.width == 0 || source.height == 0 {
        return 1.0;
    }
    let vertical = target.height as f64 / source.height as f64;
    let horizontal = target.width as f64 / source.width as f64;
    let factor = vertical.min(horizontal);
    if dont_enlarge && factor > 1.0 {
        1.0
    } else {
        factor
    }
}

/// Per-step factor when a total factor is applied in `steps` equal steps.
pub fn step_factor(total: f64, steps: u32) -> f64 {
    let steps = steps.max(1);
    if steps == 1 {
        total
    } else {
        total.powf(1.0 / steps as f64)
    }
}

/// Dimensions after applying `factor`, rounded to the nearest pixel.
///
/// A dimension that rounds to zero is floored to [`MIN_STEP_EDGE`]. The floor
/// applies to every step, including the last one of a multi-step scale.
pub fn scaled_dimensions(source: Dimensions, factor: f64) -> Dimensions {
    let scale = |edge: u32| {
        let v = (edge as f64 * factor).round();
        if v < 1.0 { MIN_STEP_EDGE } else { v as u32 }
    };
    Dimensions {
        width: scale(source.width),
        height: scale(source.height),
    }
}

/// Bounding box of a `width x height` rectangle rotated by `degrees` about its centre.
///
/// Fractional edges are truncated like a raster target would be; the small
/// epsilon absorbs trigonometric noise at right angles.
pub fn rotated_bounds(source: Dimensions, degrees: f64) -> Dimensions {
    let radians = degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let w = source.width as f64;
    let h = source.height as f64;
    let edge = |v: f64| ((v + 1e-6).floor() as u32).max(1);
    Dimensions {
        width: edge(w * cos + h * sin),
        height: edge(w * sin + h * cos),
    }
}

/// Whether an existing thumbnail is close enough to the desired box.
///
/// A dimension is within tolerance when `desired / tolerance < actual < desired * tolerance`.
/// With `require_both` the two axes must pass; otherwise either suffices.
/// A fit-box thumbnail that touches the box on one axis and sits inside it on
/// the other also passes under `require_both`.
pub fn is_thumbnail_size_ok(
    actual: Dimensions,
    desired: Dimensions,
    tolerance: f64,
    require_both: bool,
) -> bool {
    let within = |a: u32, d: u32| {
        let (a, d) = (a as f64, d as f64);
        a > d / tolerance && a < d * tolerance
    };
    let width_ok = within(actual.width, desired.width);
    let height_ok = within(actual.height, desired.height);

    if !require_both {
        return width_ok || height_ok;
    }
    if width_ok && height_ok {
        return true;
    }
    (width_ok && (actual.height as f64) < desired.height as f64 * tolerance)
        || (height_ok && (actual.width as f64) < desired.width as f64 * tolerance)
}

/// Whether `actual` sits strictly inside `desired` on both axes.
///
/// Such a thumbnail is only acceptable when the original itself is that
/// small, which only the caller can tell.
pub fn is_undersized(actual: Dimensions, desired: Dimensions, tolerance: f64) -> bool {
    actual.width > 1
        && actual.height > 1
        && (actual.width as f64) < desired.width as f64 * tolerance
        && (actual.height as f64) < desired.height as f64 * tolerance
}

/// Dimensions a fit-box scale of `original` into `target` produces.
pub fn fitted_dimensions(
    original: Dimensions,
    target: Dimensions,
    dont_enlarge: bool,
) -> Dimensions {
    scaled_dimensions(original, fit_box_factor(original, target, dont_enlarge))
}

/// Grid geometry for compositing mini thumbnails onto a group canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicLayout {
    pub columns: u32,
    pub rows: u32,
    pub cell: Dimensions,
    pub margin: u32,
    pub top_margin: u32,
}

impl MosaicLayout {
    /// Fit as many `cell`-sized slots as the canvas allows.
    pub fn new(
        canvas: Dimensions,
        cell: Dimensions,
        left_margin: u32,
        top_margin: u32,
        margin: u32,
    ) -> Self {
        let columns = canvas.width.saturating_sub(left_margin) / (cell.width + margin).max(1);
        let rows = canvas.height.saturating_sub(top_margin) / (cell.height + margin).max(1);
        Self {
            columns,
            rows,
            cell,
            margin,
            top_margin,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.columns * self.rows
    }

    /// Top-left corner of slot `index`, filled row by row.
    pub fn slot_origin(&self, index: u32) -> (u32, u32) {
        let columns = self.columns.max(1);
        let x = self.margin + (index % columns) * (self.cell.width + self.margin);
        let y = self.top_margin + (index / columns) * (self.cell.height + self.margin);
        (x, y)
    }

    /// Where a mini of `size` lands in slot `index`: centred horizontally,
    /// bottom-aligned vertically.
    pub fn placement(&self, index: u32, size: Dimensions) -> (i64, i64) {
        let (x, y) = self.slot_origin(index);
        let dx = (self.cell.width as i64 - size.width as i64) / 2;
        let dy = self.cell.height as i64 - size.height as i64;
        (x as i64 + dx, y as i64 + dy)
    }
}
