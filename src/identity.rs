//! Cache key for decoded originals.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Location of an original plus the rotation applied after decoding.
///
/// Two rotations of the same file are different identities. Rotation is
/// normalised to `[0, 360)` so `-90` and `270` compare equal.
#[derive(Debug, Clone)]
pub struct ImageIdentity {
    location: String,
    rotation: f64,
}

impl ImageIdentity {
    pub fn new(location: impl Into<String>, rotation: f64) -> Self {
        let rotation = if rotation.is_finite() {
            let r = rotation.rem_euclid(360.0);
            // rem_euclid can round up to exactly 360 for tiny negatives
            if r >= 360.0 { 0.0 } else { r }
        } else {
            0.0
        };
        Self {
            location: location.into(),
            // Folds -0.0 into 0.0
            rotation: rotation + 0.0,
        }
    }

    pub fn unrotated(location: impl Into<String>) -> Self {
        Self::new(location, 0.0)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn is_rotated(&self) -> bool {
        self.rotation != 0.0
    }
}

impl PartialEq for ImageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.rotation.to_bits() == other.rotation.to_bits()
    }
}

impl Eq for ImageIdentity {}

impl Hash for ImageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.rotation.to_bits().hash(state);
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_rotated() {
            write!(f, "{} @ {}°", self.location, self.rotation)
        } else {
            f.write_str(&self.location)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rotation_is_normalised() {
        assert_eq!(ImageIdentity::new("a", -90.0), ImageIdentity::new("a", 270.0));
        assert_eq!(ImageIdentity::new("a", 360.0), ImageIdentity::unrotated("a"));
        assert_eq!(ImageIdentity::new("a", f64::NAN).rotation(), 0.0);
    }

    #[test]
    fn negative_zero_equals_zero() {
        assert_eq!(ImageIdentity::new("a", -0.0), ImageIdentity::new("a", 0.0));
    }

    #[test]
    fn different_rotations_are_different_keys() {
        let mut set = HashSet::new();
        set.insert(ImageIdentity::new("a", 0.0));
        set.insert(ImageIdentity::new("a", 90.0));
        set.insert(ImageIdentity::new("a", 450.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_mentions_rotation_only_when_rotated() {
        assert_eq!(ImageIdentity::unrotated("/p/a.jpg").to_string(), "/p/a.jpg");
        assert_eq!(ImageIdentity::new("/p/a.jpg", 90.0).to_string(), "/p/a.jpg @ 90°");
    }
}
