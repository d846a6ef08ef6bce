//! Typed arena indices
//!
//! Linked lists that live in device memory are arenas addressed by `u32`
//! slots. A slot is not a pointer and must never be mixed up with the other
//! integers packed next to it (depth bits, packed pixel coordinates), so
//! every slot is carried as a [`TypedIndex`] tagged with the arena it
//! belongs to.

use core::marker::PhantomData;
use core::hash::{Hash, Hasher};
use core::fmt;

/// A slot in an arena of `T`, or the empty sentinel
#[repr(transparent)]
pub struct TypedIndex<T> {
    bits: u32,
    _marker: PhantomData<fn() -> T>,
}

/// Marker for the node arena of the per-pixel lists
pub enum ListNode {}

/// Index into the node buffer; `EMPTY` terminates a list
pub type NodeIndex = TypedIndex<ListNode>;

impl<T> TypedIndex<T> {
    /// Raw sentinel value, shared with the shaders
    pub const EMPTY_BITS: u32 = u32::MAX;

    /// The "empty list" / end-of-list sentinel
    pub const EMPTY: Self = Self::from_bits(Self::EMPTY_BITS);

    /// Create an index for slot `index`
    #[inline]
    pub const fn new(index: u32) -> Self {
        debug_assert!(index != Self::EMPTY_BITS);
        Self::from_bits(index)
    }

    /// Check if this is the sentinel
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bits == Self::EMPTY_BITS
    }

    /// Slot number, or `None` for the sentinel
    #[inline]
    pub const fn get(&self) -> Option<u32> {
        if self.is_empty() {
            None
        } else {
            Some(self.bits)
        }
    }

    /// Slot as `usize` for indexing host-side arenas
    #[inline]
    pub fn slot(&self) -> Option<usize> {
        self.get().map(|i| i as usize)
    }

    /// Convert to raw bits for upload
    #[inline]
    pub const fn to_bits(&self) -> u32 {
        self.bits
    }

    /// Create from raw bits read back from device memory
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    /// Whether this index addresses a slot inside an arena of `capacity`
    #[inline]
    pub const fn is_within(&self, capacity: u32) -> bool {
        !self.is_empty() && self.bits < capacity
    }
}

// Manual trait implementations to avoid T bounds
impl<T> Clone for TypedIndex<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedIndex<T> {}

impl<T> PartialEq for TypedIndex<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for TypedIndex<T> {}

impl<T> PartialOrd for TypedIndex<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TypedIndex<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.bits.cmp(&other.bits)
    }
}

impl<T> Hash for TypedIndex<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<T> fmt::Debug for TypedIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let name = name.rsplit("::").next().unwrap_or(name);
        if self.is_empty() {
            write!(f, "{}(empty)", name)
        } else {
            write!(f, "{}({})", name, self.bits)
        }
    }
}

impl<T> Default for TypedIndex<T> {
    fn default() -> Self {
        Self::EMPTY
    }
}
