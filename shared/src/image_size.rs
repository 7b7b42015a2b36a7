//! Image dimensions and size utilities

use ndarray::{ArrayBase, Ix2, RawData};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Represents the width and height of a decoded frame. Arrays built from an
/// `ImageSize` are always shaped `(height, width)` and indexed `[[y, x]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Size of a 2D array, reading its `(rows, cols)` shape as `(height, width)`
    pub fn of_array<S: RawData>(array: &ArrayBase<S, Ix2>) -> Self {
        let (height, width) = array.dim();
        Self { width, height }
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Length of the image diagonal in pixels
    pub fn diagonal(&self) -> f64 {
        (self.width as f64).hypot(self.height as f64)
    }

    /// Whether the integer pixel `(x, y)` lies inside the image
    pub fn contains(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Row-major linear index of pixel `(x, y)`
    pub fn linear_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_of_array_swaps_axes() {
        let array = Array2::<f64>::zeros((3, 7));
        let size = ImageSize::of_array(&array);
        assert_eq!(size.width, 7);
        assert_eq!(size.height, 3);
        assert_eq!(size.pixel_count(), 21);
    }

    #[test]
    fn test_diagonal() {
        let size = ImageSize::from_width_height(3, 4);
        assert_relative_eq!(size.diagonal(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_contains_and_index() {
        let size = ImageSize::from_width_height(4, 2);
        assert!(size.contains(3, 1));
        assert!(!size.contains(4, 1));
        assert!(!size.contains(-1, 0));
        assert_eq!(size.linear_index(1, 1), 5);
    }

    #[test]
    fn test_empty() {
        assert!(ImageSize::from_width_height(0, 10).is_empty());
        assert!(!ImageSize::from_width_height(1, 1).is_empty());
        assert_eq!(format!("{}", ImageSize::from_width_height(640, 480)), "640x480");
    }
}
