//! Physical frame bookkeeping.
//!
//! The memory manager only consumes the allocator's interface; [`BitmapFrames`] is the
//! bitmap-backed implementation used by the kernel and by the tests.

use crate::{BitMap, FrameNumber};

/// A pool of physical frames with bit-indexed allocation.
pub trait FrameAllocator {
    /// Allocates the lowest-numbered free frame, or returns `None` if every frame is in use.
    fn find(&mut self) -> Option<FrameNumber>;

    /// Returns a frame to the pool.
    fn clear(&mut self, frame: FrameNumber);

    /// Returns true if the frame is currently allocated.
    fn test(&self, frame: FrameNumber) -> bool;

    /// Returns the number of free frames.
    fn num_clear(&self) -> usize;

    /// Returns the total number of frames in the pool.
    fn capacity(&self) -> usize;

    /// Returns the number of allocated frames.
    fn num_used(&self) -> usize {
        self.capacity() - self.num_clear()
    }
}

/// Frame allocator backed by a [`BitMap`] with one bit per frame.
#[derive(Debug, Clone)]
pub struct BitmapFrames {
    map: BitMap,
}

impl BitmapFrames {
    /// Creates a pool of `num_frames` free frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            map: BitMap::new(num_frames),
        }
    }
}

impl FrameAllocator for BitmapFrames {
    fn find(&mut self) -> Option<FrameNumber> {
        self.map.find().map(FrameNumber::new)
    }

    fn clear(&mut self, frame: FrameNumber) {
        debug_assert!(self.map.test(frame.as_usize()), "freeing a free frame");
        self.map.clear(frame.as_usize());
    }

    fn test(&self, frame: FrameNumber) -> bool {
        self.map.test(frame.as_usize())
    }

    fn num_clear(&self) -> usize {
        self.map.num_clear()
    }

    fn capacity(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_frees() {
        let mut frames = BitmapFrames::new(4);
        let first = frames.find().unwrap();
        let second = frames.find().unwrap();
        assert_eq!(first, FrameNumber::new(0));
        assert_eq!(second, FrameNumber::new(1));
        assert_eq!(frames.num_used(), 2);

        frames.clear(first);
        assert!(!frames.test(first));
        assert!(frames.test(second));
        assert_eq!(frames.num_clear(), 3);
    }

    #[test]
    fn reports_exhaustion() {
        let mut frames = BitmapFrames::new(1);
        assert!(frames.find().is_some());
        assert!(frames.find().is_none());
    }
}
