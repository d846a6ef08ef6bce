//! Two-dimensional extents and pixel coordinate packing

use core::fmt;

use crate::error::ExtentError;

/// Width and height of an image, in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    /// Create an extent
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A `size` x `size` extent
    #[inline]
    pub const fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    /// Number of pixels
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check if either dimension is zero
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Reject empty extents and extents with a side above `limit`
    pub fn check(&self, limit: u32) -> Result<(), ExtentError> {
        if self.is_empty() {
            return Err(ExtentError::Empty { width: self.width, height: self.height });
        }
        if self.width > limit || self.height > limit {
            return Err(ExtentError::TooLarge {
                width: self.width,
                height: self.height,
                limit,
            });
        }
        Ok(())
    }

    /// Row-major linear index of `(x, y)`, if inside
    #[inline]
    pub fn linear(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }

    /// Inverse of [`Extent2d::linear`]
    #[inline]
    pub fn coords(&self, index: usize) -> (u32, u32) {
        let w = self.width.max(1) as usize;
        ((index % w) as u32, (index / w) as u32)
    }

    /// Number of `group` sized tiles needed to cover the extent
    #[inline]
    pub const fn dispatch_size(&self, group: u32) -> (u32, u32) {
        (
            (self.width + group - 1) / group,
            (self.height + group - 1) / group,
        )
    }
}

impl fmt::Display for Extent2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Screen pixel packed as `x | y << 16`, the layout of a list node's
/// coverage field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PackedPixel(pub u32);

impl PackedPixel {
    /// Largest coordinate that survives packing
    pub const MAX_COORD: u32 = 0xFFFF;

    /// Pack a pixel coordinate
    #[inline]
    pub const fn new(x: u32, y: u32) -> Self {
        Self((x & Self::MAX_COORD) | ((y & Self::MAX_COORD) << 16))
    }

    #[inline]
    pub const fn x(&self) -> u32 {
        self.0 & Self::MAX_COORD
    }

    #[inline]
    pub const fn y(&self) -> u32 {
        self.0 >> 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_linear_and_coords() {
        let e = Extent2d::new(4, 3);
        assert_eq!(e.area(), 12);
        assert_eq!(e.linear(3, 2), Some(11));
        assert_eq!(e.linear(4, 0), None);
        assert_eq!(e.coords(11), (3, 2));
    }

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(Extent2d::new(800, 600).dispatch_size(8), (100, 75));
        assert_eq!(Extent2d::new(801, 1).dispatch_size(8), (101, 1));
    }

    #[test]
    fn test_packed_pixel() {
        let p = PackedPixel::new(1919, 1079);
        assert_eq!(p.x(), 1919);
        assert_eq!(p.y(), 1079);
        assert_eq!(p.0, 1919 | (1079 << 16));
    }

    #[test]
    fn test_check_limits() {
        assert!(Extent2d::new(1280, 720).check(8192).is_ok());
        assert_eq!(
            Extent2d::new(0, 720).check(8192),
            Err(ExtentError::Empty { width: 0, height: 720 })
        );
        assert!(matches!(
            Extent2d::new(9000, 10).check(8192),
            Err(ExtentError::TooLarge { limit: 8192, .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Extent2d::square(1024).to_string(), "1024x1024");
    }
}
