//! Simulated main memory.

use alloc::vec;
use alloc::vec::Vec;

use crate::{FrameNumber, PAGE_SIZE, PhysicalAddress};

/// Main memory: a flat byte array of `num_frames * PAGE_SIZE` bytes.
///
/// Frames are handed out by a [`FrameAllocator`](crate::FrameAllocator); this type only
/// stores their contents.
pub struct PhysicalMemory {
    bytes: Vec<u8>,
}

impl PhysicalMemory {
    /// Creates zero-filled memory holding `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            bytes: vec![0; num_frames * PAGE_SIZE],
        }
    }

    /// Returns the number of frames in memory.
    pub fn num_frames(&self) -> usize {
        self.bytes.len() / PAGE_SIZE
    }

    /// Returns the contents of a frame.
    ///
    /// # Panics
    /// Panics if the frame is beyond the end of memory.
    pub fn frame(&self, frame: FrameNumber) -> &[u8] {
        let start = frame.start().as_usize();
        &self.bytes[start..start + PAGE_SIZE]
    }

    /// Returns the contents of a frame for writing.
    ///
    /// # Panics
    /// Panics if the frame is beyond the end of memory.
    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.start().as_usize();
        &mut self.bytes[start..start + PAGE_SIZE]
    }

    /// Reads the byte at a physical address.
    pub fn read_byte(&self, addr: PhysicalAddress) -> u8 {
        self.bytes[addr.as_usize()]
    }

    /// Writes the byte at a physical address.
    pub fn write_byte(&mut self, addr: PhysicalAddress, value: u8) {
        self.bytes[addr.as_usize()] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_do_not_overlap() {
        let mut memory = PhysicalMemory::new(2);
        memory.frame_mut(FrameNumber::new(1)).fill(0xAB);
        assert!(memory.frame(FrameNumber::new(0)).iter().all(|b| *b == 0));
        assert!(memory.frame(FrameNumber::new(1)).iter().all(|b| *b == 0xAB));
        assert_eq!(memory.num_frames(), 2);
    }

    #[test]
    fn byte_access_matches_frame_view() {
        let mut memory = PhysicalMemory::new(2);
        let addr = FrameNumber::new(1).start() + 3;
        memory.write_byte(addr, 7);
        assert_eq!(memory.frame(FrameNumber::new(1))[3], 7);
        assert_eq!(memory.read_byte(addr), 7);
    }
}
