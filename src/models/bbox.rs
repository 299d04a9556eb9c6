//! Bounding box types used across zones, shields, and OCR words.
//!
//! Two forms exist: pixel-space `BoundingBox` for working against a concrete
//! image, and `NormalizedBox` (0.0-1.0) for anything persisted across DPI or
//! resize changes (cleanup shields, vendor rules, coordinate mappings).

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether a point lies within this box.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Intersection rectangle, if any.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(BoundingBox::new(x, y, right - x, bottom - y))
    }

    /// Clamp this box to fit within an image of the given dimensions.
    pub fn clamped(&self, img_width: u32, img_height: u32) -> BoundingBox {
        let x = self.x.min(img_width.saturating_sub(1));
        let y = self.y.min(img_height.saturating_sub(1));
        BoundingBox::new(
            x,
            y,
            self.width.min(img_width - x),
            self.height.min(img_height - y),
        )
    }

    /// Grow by `padding` pixels on each side, clamped to image bounds.
    pub fn padded(&self, padding: u32, img_width: u32, img_height: u32) -> BoundingBox {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = (self.right() + padding).min(img_width);
        let bottom = (self.bottom() + padding).min(img_height);
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Convert to a resolution-independent normalized box.
    pub fn normalize(&self, img_width: u32, img_height: u32) -> NormalizedBox {
        NormalizedBox {
            x: self.x as f64 / img_width as f64,
            y: self.y as f64 / img_height as f64,
            width: self.width as f64 / img_width as f64,
            height: self.height as f64 / img_height as f64,
        }
    }
}

/// Axis-aligned rectangle with coordinates normalized to 0.0-1.0.
///
/// Resolution-independent: the same normalized box addresses the same page
/// region at any DPI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    pub fn intersects(&self, other: &NormalizedBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersection(&self, other: &NormalizedBox) -> Option<NormalizedBox> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(NormalizedBox::new(x, y, right - x, bottom - y))
    }

    /// Fraction of `other`'s area covered by this box.
    pub fn overlap_ratio(&self, other: &NormalizedBox) -> f64 {
        if other.area() <= 0.0 {
            return 0.0;
        }
        match self.intersection(other) {
            Some(inter) => inter.area() / other.area(),
            None => 0.0,
        }
    }

    /// Whether coordinates are valid (within 0-1, positive extent).
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.right() <= 1.0 + f64::EPSILON
            && self.bottom() <= 1.0 + f64::EPSILON
    }

    /// Convert to pixel coordinates for an image of the given dimensions.
    pub fn denormalize(&self, img_width: u32, img_height: u32) -> BoundingBox {
        BoundingBox {
            x: (self.x * img_width as f64).round() as u32,
            y: (self.y * img_height as f64).round() as u32,
            width: (self.width * img_width as f64).round() as u32,
            height: (self.height * img_height as f64).round() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_point() {
        let b = BoundingBox::new(10, 10, 100, 50);
        assert!(b.contains(10, 10));
        assert!(b.contains(109, 59));
        assert!(!b.contains(110, 60));
        assert!(!b.contains(5, 30));
    }

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(50, 50, 100, 100);
        let inter = a.intersection(&b).unwrap();
        assert_eq!(inter, BoundingBox::new(50, 50, 50, 50));
    }

    #[test]
    fn test_no_intersection() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 10, 10);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_padded_clamps_to_image() {
        let b = BoundingBox::new(5, 5, 20, 20);
        let padded = b.padded(10, 30, 30);
        assert_eq!(padded, BoundingBox::new(0, 0, 30, 30));
    }

    #[test]
    fn test_normalize_roundtrip() {
        let b = BoundingBox::new(100, 200, 300, 400);
        let n = b.normalize(1000, 2000);
        assert_eq!(n.denormalize(1000, 2000), b);
    }

    #[test]
    fn test_overlap_ratio() {
        let shield = NormalizedBox::new(0.0, 0.0, 0.5, 0.5);
        let zone = NormalizedBox::new(0.25, 0.25, 0.5, 0.5);
        // Intersection is 0.25 x 0.25 = 0.0625; zone area 0.25.
        let ratio = shield.overlap_ratio(&zone);
        assert!((ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_validity() {
        assert!(NormalizedBox::new(0.1, 0.1, 0.5, 0.5).is_valid());
        assert!(!NormalizedBox::new(0.8, 0.1, 0.5, 0.5).is_valid());
        assert!(!NormalizedBox::new(0.1, 0.1, 0.0, 0.5).is_valid());
    }
}
