//! # umbra_core - Umbra Core
//!
//! Zero-dependency primitives shared by every Umbra crate:
//! - **Typed indices**: arena slots that cannot be confused with plain integers
//! - **Extents**: window and shadow-map dimensions
//! - **Errors**: extent and index errors
//!
//! Nothing here knows about a graphics API.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod index;
pub mod extent;
pub mod error;

pub use index::*;
pub use extent::*;
pub use error::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::index::{TypedIndex, NodeIndex, ListNode};
    pub use crate::extent::{Extent2d, PackedPixel};
    pub use crate::error::{ExtentError, IndexError};
}
