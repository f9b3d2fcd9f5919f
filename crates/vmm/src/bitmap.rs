//! Bit-indexed free-list bookkeeping.

use alloc::vec;
use alloc::vec::Vec;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A fixed-size array of bits, each marking one resource as in use.
///
/// Used for physical frames and for address space identifiers. Bits are allocated lowest
/// index first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMap {
    words: Vec<u64>,
    num_bits: usize,
}

impl BitMap {
    /// Creates a bitmap of `num_bits` bits, all clear.
    pub fn new(num_bits: usize) -> Self {
        Self {
            words: vec![0; num_bits.div_ceil(BITS_PER_WORD)],
            num_bits,
        }
    }

    /// Returns the number of bits tracked by this bitmap.
    pub fn len(&self) -> usize {
        self.num_bits
    }

    /// Returns true if this bitmap tracks no bits at all.
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Sets the bit at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn mark(&mut self, index: usize) {
        assert!(index < self.num_bits, "bit index out of range");
        self.words[index / BITS_PER_WORD] |= 1 << (index % BITS_PER_WORD);
    }

    /// Clears the bit at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.num_bits, "bit index out of range");
        self.words[index / BITS_PER_WORD] &= !(1 << (index % BITS_PER_WORD));
    }

    /// Returns true if the bit at `index` is set. Out-of-range bits read as clear.
    pub fn test(&self, index: usize) -> bool {
        index < self.num_bits && self.words[index / BITS_PER_WORD] & (1 << (index % BITS_PER_WORD)) != 0
    }

    /// Finds the lowest clear bit, sets it and returns its index.
    pub fn find(&mut self) -> Option<usize> {
        let (word_index, word) = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let index = word_index * BITS_PER_WORD + word.trailing_ones() as usize;
        if index >= self.num_bits {
            return None;
        }
        self.mark(index);
        Some(index)
    }

    /// Returns the number of clear bits.
    pub fn num_clear(&self) -> usize {
        self.num_bits - self.num_set()
    }

    /// Returns the number of set bits.
    pub fn num_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}
