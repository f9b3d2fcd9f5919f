//! Address space identifiers.

use core::fmt;

use crate::BitMap;

/// Identifier of a live address space, unique among live spaces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SpaceId(usize);

impl SpaceId {
    /// Creates an identifier from its raw value.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceId({})", self.0)
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded pool of [`SpaceId`]s. The lowest free identifier is handed out first.
#[derive(Debug, Clone)]
pub struct SpaceIdPool {
    map: BitMap,
}

impl SpaceIdPool {
    /// Creates a pool of `capacity` identifiers, all free.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BitMap::new(capacity),
        }
    }

    /// Takes a free identifier, or returns `None` if all are in use.
    pub fn allocate(&mut self) -> Option<SpaceId> {
        self.map.find().map(SpaceId)
    }

    /// Returns an identifier to the pool.
    pub fn release(&mut self, id: SpaceId) {
        debug_assert!(self.map.test(id.0), "releasing a free space id");
        self.map.clear(id.0);
    }

    /// Returns true if `id` is currently handed out.
    pub fn is_live(&self, id: SpaceId) -> bool {
        self.map.test(id.0)
    }

    /// Returns the number of identifiers in use.
    pub fn num_live(&self) -> usize {
        self.map.num_set()
    }

    /// Returns the size of the pool.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }
}
