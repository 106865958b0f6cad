//! Parameter types for scaling and encoding.
//!
//! These describe *what* a scale should produce, not *how*. The
//! [`ScalableImage`](crate::scalable::ScalableImage) consumes them and hands
//! the pixel work to [`codec`](super::codec).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (0.0–1.0, default 0.8). Clamped on construction.
//! - [`ScaleMode`]: Nearest-neighbour single step vs. smooth multi-step filtering.
//! - [`TargetMode`]: Explicit factor or fit-to-box.
//! - [`ScaleSettings`]: Everything a scale needs besides the source bitmap.

/// Quality setting for lossy image encoding (0.0-1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality(f32);

impl Quality {
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self::default();
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// The 1-100 scale JPEG encoders expect.
    pub fn jpeg_quality(self) -> u8 {
        ((self.0 * 100.0).round() as u8).clamp(1, 100)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(0.8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// Nearest-neighbour in a single step.
    #[default]
    Fast,
    /// Smooth filter applied in `steps` incremental steps.
    Quality,
}

/// How the scale factor is determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetMode {
    ExplicitFactor(f64),
    FitBox { width: u32, height: u32 },
}

impl TargetMode {
    /// Fit-to-box, replacing degenerate boxes with 100x100.
    pub fn fit_box(width: u32, height: u32) -> Self {
        if width < 1 || height < 1 {
            Self::FitBox {
                width: 100,
                height: 100,
            }
        } else {
            Self::FitBox { width, height }
        }
    }
}

impl Default for TargetMode {
    fn default() -> Self {
        Self::ExplicitFactor(1.0)
    }
}

/// Full specification for a scale, minus the bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSettings {
    pub target: TargetMode,
    pub mode: ScaleMode,
    /// Incremental steps in [`ScaleMode::Quality`]. Ignored for `Fast`.
    pub steps: u32,
    /// Clamp fit-box factors above 1 down to 1.
    pub dont_enlarge: bool,
    pub quality: Quality,
    /// Upper bound on a single bitmap allocation, in bytes.
    pub max_alloc: Option<u64>,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            target: TargetMode::default(),
            mode: ScaleMode::default(),
            steps: 1,
            dont_enlarge: false,
            quality: Quality::default(),
            max_alloc: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(-0.5).value(), 0.0);
        assert_eq!(Quality::new(0.5).value(), 0.5);
        assert_eq!(Quality::new(1.5).value(), 1.0);
        assert_eq!(Quality::new(f32::NAN), Quality::default());
    }

    #[test]
    fn quality_default_is_0_8() {
        assert_eq!(Quality::default().value(), 0.8);
        assert_eq!(Quality::default().jpeg_quality(), 80);
    }

    #[test]
    fn jpeg_quality_never_zero() {
        assert_eq!(Quality::new(0.0).jpeg_quality(), 1);
        assert_eq!(Quality::new(1.0).jpeg_quality(), 100);
    }

    #[test]
    fn degenerate_fit_box_becomes_100_square() {
        assert_eq!(
            TargetMode::fit_box(0, 50),
            TargetMode::FitBox {
                width: 100,
                height: 100
            }
        );
        assert_eq!(
            TargetMode::fit_box(300, 200),
            TargetMode::FitBox {
                width: 300,
                height: 200
            }
        );
    }
}
