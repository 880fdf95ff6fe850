//! Bounding boxes, intersection-over-union and planar vector angles.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Axis-aligned box `[x1, y1, x2, y2]` in image (or local ground) units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_array(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    /// Box of half-extents `(half_w, half_h)` centred on `(cx, cy)`.
    pub fn around(cx: f64, cy: f64, half_w: f64, half_h: f64) -> Self {
        Self::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Finite coordinates and strictly positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite()) && self.x2 > self.x1 && self.y2 > self.y1
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Vector2<f64> {
        Vector2::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Intersection-over-union of two boxes.
///
/// Returns 0.0 when the boxes do not overlap, when either box is invalid or
/// when the union is not positive.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    if !a.is_valid() || !b.is_valid() {
        return 0.0;
    }
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    if ix2 <= ix1 || iy2 <= iy1 {
        return 0.0;
    }
    let intersection = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Angle between two planar vectors in degrees, in `[0, 180]`.
///
/// A zero-length vector has no direction; the result is then 90°.
pub fn angle_between(v1: &Vector2<f64>, v2: &Vector2<f64>) -> f64 {
    let n1 = v1.norm();
    let n2 = v2.norm();
    if n1 <= f64::EPSILON || n2 <= f64::EPSILON || !(n1.is_finite() && n2.is_finite()) {
        return 90.0;
    }
    let cos = (v1.dot(v2) / (n1 * n2)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
