//! Per-texel linked lists in a flat atomic arena
//!
//! Host-side mirror of the device data structure: a head-pointer image with
//! one [`NodeIndex`] per light texel, a node arena of 4-word records and an
//! allocation counter. Insertion follows the same protocol as the list
//! building shader, so concurrent inserters never lose a node:
//!
//! 1. `slot = counter.fetch_add(1)`
//! 2. drop the sample if `slot >= capacity` (the counter keeps counting)
//! 3. `prev = heads[texel].swap(slot)`
//! 4. `nodes[slot] = (depth, pixel, prev, 0)`
//!
//! Lists come out in reverse insertion order. Readers only look at the
//! arena once every inserter has finished.

use core::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use umbra_core::{Extent2d, IndexError, NodeIndex, PackedPixel};

/// Words per node record
pub const NODE_WORDS: usize = 4;

/// One decoded list node
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ListRecord {
    /// Linear light depth of the sample
    pub depth: f32,
    /// Screen pixel that produced the sample
    pub pixel: PackedPixel,
    pub next: NodeIndex,
}

impl ListRecord {
    /// Device layout: `vec4<u32>(bitcast(depth), pixel, next, 0)`
    pub fn to_words(&self) -> [u32; NODE_WORDS] {
        [self.depth.to_bits(), self.pixel.0, self.next.to_bits(), 0]
    }

    pub fn from_words(words: [u32; NODE_WORDS]) -> Self {
        Self {
            depth: f32::from_bits(words[0]),
            pixel: PackedPixel(words[1]),
            next: NodeIndex::from_bits(words[2]),
        }
    }
}

/// Insertion failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListError {
    #[error("node buffer overflow: slot {requested} requested, capacity {capacity}")]
    Overflow { requested: u32, capacity: u32 },

    #[error("texel ({x}, {y}) outside the head-pointer image")]
    TexelOutOfBounds { x: u32, y: u32 },
}

/// Atomic arena of per-texel lists
pub struct ListBuffer {
    head_extent: Extent2d,
    heads: Vec<AtomicU32>,
    nodes: Vec<AtomicU32>,
    counter: AtomicU32,
    capacity: u32,
}

impl ListBuffer {
    /// Empty lists over `head_extent` texels with room for `capacity` nodes
    pub fn new(head_extent: Extent2d, capacity: u32) -> Self {
        let heads = (0..head_extent.area())
            .map(|_| AtomicU32::new(NodeIndex::EMPTY_BITS))
            .collect();
        let nodes = (0..capacity as usize * NODE_WORDS).map(|_| AtomicU32::new(0)).collect();
        Self {
            head_extent,
            heads,
            nodes,
            counter: AtomicU32::new(0),
            capacity,
        }
    }

    /// Clear heads to the sentinel and the counter to zero
    ///
    /// Node contents are left as they are; they are unreachable afterwards.
    pub fn reset(&mut self) {
        for head in &mut self.heads {
            *head.get_mut() = NodeIndex::EMPTY_BITS;
        }
        *self.counter.get_mut() = 0;
    }

    /// Insert a sample at the front of texel `(x, y)`'s list
    pub fn insert(&self, x: u32, y: u32, depth: f32, pixel: PackedPixel) -> Result<NodeIndex, ListError> {
        let head = self
            .head_extent
            .linear(x, y)
            .ok_or(ListError::TexelOutOfBounds { x, y })?;

        let slot = self.counter.fetch_add(1, Ordering::AcqRel);
        if slot >= self.capacity {
            return Err(ListError::Overflow {
                requested: slot,
                capacity: self.capacity,
            });
        }

        let prev = self.heads[head].swap(slot, Ordering::AcqRel);
        let record = ListRecord {
            depth,
            pixel,
            next: NodeIndex::from_bits(prev),
        };
        let base = slot as usize * NODE_WORDS;
        for (i, word) in record.to_words().into_iter().enumerate() {
            self.nodes[base + i].store(word, Ordering::Release);
        }
        Ok(NodeIndex::new(slot))
    }

    /// Allocation requests this frame, including dropped ones
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Nodes actually stored this frame
    #[inline]
    pub fn stored(&self) -> u32 {
        self.allocated().min(self.capacity)
    }

    /// Samples dropped because the arena was full
    #[inline]
    pub fn overflowed(&self) -> u32 {
        self.allocated().saturating_sub(self.capacity)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn head_extent(&self) -> Extent2d {
        self.head_extent
    }

    /// Head of texel `(x, y)`, `EMPTY` outside the image
    pub fn head(&self, x: u32, y: u32) -> NodeIndex {
        self.head_extent
            .linear(x, y)
            .map(|i| NodeIndex::from_bits(self.heads[i].load(Ordering::Acquire)))
            .unwrap_or(NodeIndex::EMPTY)
    }

    /// Decode a stored node
    pub fn node(&self, index: NodeIndex) -> Result<ListRecord, IndexError> {
        let slot = index.get().ok_or(IndexError::Empty)?;
        let stored = self.stored();
        if slot >= stored {
            return Err(IndexError::OutOfBounds { index: slot, capacity: stored });
        }
        let base = slot as usize * NODE_WORDS;
        let mut words = [0u32; NODE_WORDS];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.nodes[base + i].load(Ordering::Acquire);
        }
        Ok(ListRecord::from_words(words))
    }

    /// Walk texel `(x, y)`'s list, visiting at most `max_nodes` nodes
    pub fn iter(&self, x: u32, y: u32, max_nodes: u32) -> ListIter<'_> {
        ListIter {
            list: self,
            cursor: self.head(x, y),
            remaining: max_nodes,
        }
    }

    /// Raw head values in row-major order
    pub fn heads_snapshot(&self) -> Vec<u32> {
        self.heads.iter().map(|h| h.load(Ordering::Acquire)).collect()
    }
}

/// Bounded list traversal
pub struct ListIter<'a> {
    list: &'a ListBuffer,
    cursor: NodeIndex,
    remaining: u32,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = (NodeIndex, ListRecord);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.cursor.is_empty() {
            return None;
        }
        let index = self.cursor;
        let record = self.list.node(index).ok()?;
        self.remaining -= 1;
        self.cursor = record.next;
        Some((index, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_lists() {
        let list = ListBuffer::new(Extent2d::square(4), 8);
        assert!(list.head(0, 0).is_empty());
        assert_eq!(list.iter(3, 3, 100).count(), 0);
        assert!(list.heads_snapshot().iter().all(|h| *h == u32::MAX));
    }

    #[test]
    fn test_reverse_insertion_order() {
        let list = ListBuffer::new(Extent2d::square(2), 8);
        for i in 0..3 {
            list.insert(1, 0, i as f32, PackedPixel::new(i, 0)).unwrap();
        }
        let depths: Vec<f32> = list.iter(1, 0, 10).map(|(_, r)| r.depth).collect();
        assert_eq!(depths, vec![2.0, 1.0, 0.0]);
        assert!(list.head(0, 0).is_empty());
    }

    #[test]
    fn test_overflow_is_reported_not_written() {
        let list = ListBuffer::new(Extent2d::square(2), 2);
        assert!(list.insert(0, 0, 1.0, PackedPixel::new(0, 0)).is_ok());
        assert!(list.insert(0, 0, 2.0, PackedPixel::new(1, 0)).is_ok());
        assert_eq!(
            list.insert(0, 0, 3.0, PackedPixel::new(2, 0)),
            Err(ListError::Overflow { requested: 2, capacity: 2 })
        );
        assert_eq!(list.allocated(), 3);
        assert_eq!(list.stored(), 2);
        assert_eq!(list.overflowed(), 1);
        assert_eq!(list.iter(0, 0, 10).count(), 2);
    }

    #[test]
    fn test_out_of_bounds_texel() {
        let list = ListBuffer::new(Extent2d::square(2), 2);
        assert_eq!(
            list.insert(2, 0, 1.0, PackedPixel::new(0, 0)),
            Err(ListError::TexelOutOfBounds { x: 2, y: 0 })
        );
        assert_eq!(list.allocated(), 0);
    }

    #[test]
    fn test_traversal_bound() {
        let list = ListBuffer::new(Extent2d::square(1), 16);
        for i in 0..10 {
            list.insert(0, 0, i as f32, PackedPixel::new(0, 0)).unwrap();
        }
        assert_eq!(list.iter(0, 0, 4).count(), 4);
    }

    #[test]
    fn test_reset_empties_lists() {
        let mut list = ListBuffer::new(Extent2d::square(2), 4);
        list.insert(1, 1, 0.5, PackedPixel::new(0, 0)).unwrap();
        list.reset();
        assert_eq!(list.allocated(), 0);
        assert!(list.head(1, 1).is_empty());
        assert_eq!(
            list.node(NodeIndex::new(0)),
            Err(IndexError::OutOfBounds { index: 0, capacity: 0 })
        );
        assert_eq!(list.node(NodeIndex::EMPTY), Err(IndexError::Empty));
    }

    #[test]
    fn test_record_words() {
        let r = ListRecord {
            depth: 12.5,
            pixel: PackedPixel::new(3, 4),
            next: NodeIndex::EMPTY,
        };
        let w = r.to_words();
        assert_eq!(w[2], u32::MAX);
        assert_eq!(w[3], 0);
        assert_eq!(ListRecord::from_words(w), r);
    }
}
