//! The working-set table.
//!
//! An ordered sequence of the resident pages that may be evicted. The order carries the
//! replacement policy's meaning (load order for FIFO, the circular scan order for CLOCK),
//! so the policy decides where new pages are inserted.

use alloc::vec::Vec;
use core::fmt;

use crate::{PageNumber, SpaceId};

/// A resident page, identified by its owning space and virtual page number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResidentPage {
    pub space: SpaceId,
    pub page: PageNumber,
}

impl ResidentPage {
    /// Creates a working-set entry.
    pub const fn new(space: SpaceId, page: PageNumber) -> Self {
        Self { space, page }
    }
}

impl fmt::Debug for ResidentPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.space, self.page)
    }
}

/// Ordered table of evictable resident pages.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    entries: Vec<ResidentPage>,
    capacity: usize,
}

impl WorkingSet {
    /// Creates an empty table that holds at most `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the number of pages in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if no more pages fit.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Returns the maximum number of pages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the page at `index`.
    pub fn get(&self, index: usize) -> Option<ResidentPage> {
        self.entries.get(index).copied()
    }

    /// Returns the position of `page`, if present.
    pub fn position(&self, page: ResidentPage) -> Option<usize> {
        self.entries.iter().position(|entry| *entry == page)
    }

    /// Inserts `page` at `index`, shifting later entries towards the tail.
    ///
    /// # Panics
    /// Panics if `index > len()`.
    pub fn insert(&mut self, index: usize, page: ResidentPage) {
        debug_assert!(!self.is_full(), "working set overflow");
        debug_assert!(self.position(page).is_none(), "page already in working set");
        self.entries.insert(index, page);
    }

    /// Appends `page` at the tail.
    pub fn push(&mut self, page: ResidentPage) {
        self.insert(self.entries.len(), page);
    }

    /// Removes and returns the page at `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn remove(&mut self, index: usize) -> ResidentPage {
        self.entries.remove(index)
    }

    /// Iterates over the pages in table order.
    pub fn iter(&self) -> impl Iterator<Item = ResidentPage> + '_ {
        self.entries.iter().copied()
    }

    /// Returns the positions of every page owned by `space`, in table order.
    pub fn positions_of(&self, space: SpaceId) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.space == space)
            .map(|(index, _)| index)
            .collect()
    }
}
