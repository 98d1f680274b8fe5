//! Map extent and point types, expressed in map grid units

use serde::{Deserialize, Serialize};

/// Rectangular map extent in grid (projected) units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Extent {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Centre point of the extent
    pub fn centre(&self) -> MapPoint {
        MapPoint {
            x: (self.left + self.right) / 2.0,
            y: (self.bottom + self.top) / 2.0,
        }
    }

    /// True when every edge is finite and the extent has non-negative size
    pub fn is_valid(&self) -> bool {
        [self.left, self.bottom, self.right, self.top]
            .iter()
            .all(|v| v.is_finite())
            && self.left <= self.right
            && self.bottom <= self.top
    }
}

/// A point in grid units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}
