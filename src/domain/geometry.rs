//! Planar geometry helpers for tripwire counting
//!
//! Image coordinates: x grows to the right, y grows downward.

use serde::{Deserialize, Serialize};

/// A point in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from(p: [f64; 2]) -> Self {
        Self { x: p[0], y: p[1] }
    }
}

/// Axis-aligned box as reported by the detector (x1, y1, x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from a detector `xyxy` slice; anything other than four finite
    /// numbers is rejected
    pub fn from_xyxy(xyxy: &[f64]) -> Option<Self> {
        match *xyxy {
            [x1, y1, x2, y2] if xyxy.iter().all(|v| v.is_finite()) => {
                Some(Self::new(x1, y1, x2, y2))
            }
            _ => None,
        }
    }

    #[inline]
    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Strict counter-clockwise test for the triangle (a, b, c)
#[inline]
fn ccw(a: Point, b: Point, c: Point) -> bool {
    (c.y - a.y) * (b.x - a.x) > (b.y - a.y) * (c.x - a.x)
}

/// Segment AB intersects segment CD.
///
/// Collinear and touching configurations are not special-cased: they resolve
/// to whatever the strict sign comparison yields.
#[inline]
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    ccw(a, c, d) != ccw(b, c, d) && ccw(a, b, c) != ccw(a, b, d)
}
