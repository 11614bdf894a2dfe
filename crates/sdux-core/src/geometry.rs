//! Geometry types for window placement.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Position and size of a top-level window, in root coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub struct Geometry {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Geometry {
    /// Create new geometry.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the window has no visible extent.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check if a point lies within this rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        x >= self.x && (x as i64) < right && y >= self.y && (y as i64) < bottom
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_area() {
        assert_eq!(Geometry::new(0, 0, 640, 480).area(), 307_200);
        assert!(Geometry::new(10, 10, 0, 5).is_empty());
        assert!(!Geometry::new(10, 10, 1, 1).is_empty());
    }

    #[test]
    fn test_geometry_contains() {
        let geom = Geometry::new(-10, 20, 100, 50);
        assert!(geom.contains(-10, 20));
        assert!(geom.contains(89, 69));
        assert!(!geom.contains(90, 20));
        assert!(!geom.contains(0, 70));
    }

    #[test]
    fn test_geometry_display() {
        assert_eq!(Geometry::new(5, -3, 800, 600).to_string(), "800x600+5+-3");
    }
}
