//! Error types for the core library

use core::fmt;

/// Extent errors
#[derive(Debug, Clone, PartialEq)]
pub enum ExtentError {
    /// One of the dimensions is zero
    Empty { width: u32, height: u32 },
    /// Dimension exceeds a device or packing limit
    TooLarge { width: u32, height: u32, limit: u32 },
    /// Value must be a power of two
    NotPowerOfTwo(u32),
    /// Value outside an inclusive range
    OutOfRange { value: u32, min: u32, max: u32 },
}

impl fmt::Display for ExtentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtentError::Empty { width, height } => {
                write!(f, "empty extent {}x{}", width, height)
            }
            ExtentError::TooLarge { width, height, limit } => {
                write!(f, "extent {}x{} exceeds limit {}", width, height, limit)
            }
            ExtentError::NotPowerOfTwo(v) => write!(f, "{} is not a power of two", v),
            ExtentError::OutOfRange { value, min, max } => {
                write!(f, "{} outside [{}, {}]", value, min, max)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ExtentError {}

/// Arena index errors
#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    /// Slot is past the arena capacity
    OutOfBounds { index: u32, capacity: u32 },
    /// Sentinel used where a slot was required
    Empty,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::OutOfBounds { index, capacity } => {
                write!(f, "index {} out of bounds (capacity {})", index, capacity)
            }
            IndexError::Empty => write!(f, "empty index"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IndexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = IndexError::OutOfBounds { index: 10, capacity: 4 };
        assert_eq!(e.to_string(), "index 10 out of bounds (capacity 4)");
        assert_eq!(ExtentError::NotPowerOfTwo(48).to_string(), "48 is not a power of two");
    }

    #[test]
    fn test_errors_are_std_errors() {
        fn source_of(e: &dyn std::error::Error) -> bool {
            e.source().is_none()
        }
        assert!(source_of(&ExtentError::Empty { width: 0, height: 4 }));
        assert!(source_of(&IndexError::Empty));
    }
}
