//! Host images

use std::sync::atomic::{AtomicU32, Ordering};

use umbra_core::Extent2d;

/// Row-major image of `T`
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    extent: Extent2d,
    data: Vec<T>,
}

impl<T: Copy> Image<T> {
    pub fn new(extent: Extent2d, fill: T) -> Self {
        Self {
            extent,
            data: vec![fill; extent.area() as usize],
        }
    }

    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<T> {
        self.extent.linear(x, y).map(|i| self.data[i])
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        if let Some(i) = self.extent.linear(x, y) {
            self.data[i] = value;
        }
    }

    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Image of atomic counters, shared between worker threads
#[derive(Debug)]
pub struct AtomicImage {
    extent: Extent2d,
    data: Vec<AtomicU32>,
}

impl AtomicImage {
    pub fn new(extent: Extent2d) -> Self {
        Self {
            extent,
            data: (0..extent.area()).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Atomically add `value` at `(x, y)`
    #[inline]
    pub fn add(&self, x: u32, y: u32, value: u32) {
        if let Some(i) = self.extent.linear(x, y) {
            self.data[i].fetch_add(value, Ordering::AcqRel);
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        self.extent
            .linear(x, y)
            .map(|i| self.data[i].load(Ordering::Acquire))
    }

    pub fn clear(&mut self) {
        for v in &mut self.data {
            *v.get_mut() = 0;
        }
    }

    /// Plain copy of the values
    pub fn snapshot(&self) -> Vec<u32> {
        self.data.iter().map(|v| v.load(Ordering::Acquire)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_get_set() {
        let mut img = Image::new(Extent2d::new(3, 2), 0u8);
        img.set(2, 1, 9);
        img.set(3, 1, 7);
        assert_eq!(img.get(2, 1), Some(9));
        assert_eq!(img.get(3, 1), None);
        assert_eq!(img.pixels().iter().filter(|v| **v != 0).count(), 1);
    }

    #[test]
    fn test_atomic_image_from_threads() {
        let img = AtomicImage::new(Extent2d::square(2));
        crossbeam_utils::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|_| {
                    for _ in 0..100 {
                        img.add(1, 1, 1);
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(img.get(1, 1), Some(400));
        assert_eq!(img.snapshot(), vec![0, 0, 0, 400]);
    }
}
