#![cfg_attr(not(test), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! The VMM gives each user program its own address space and keeps it resident under a
//! fixed physical frame budget. It provides:
//!
//! - Loading of NOFF executables into demand-paged address spaces.
//! - A per-space page table with valid/referenced/dirty residency state.
//! - A page fault handler that swaps pages in from a per-space swap region.
//! - Pluggable page replacement (FIFO, LIFO, RANDOM, CLOCK, enhanced CLOCK, LRU).
//!
//! Physical frame bookkeeping and the backing store are consumed through the
//! [`FrameAllocator`] and [`FileSystem`] traits, so the same code runs inside the kernel and
//! in host-side tests with the in-memory implementations provided here.
//!
//! All state lives in an explicit [`VirtualMemory`] context. The design assumes a single CPU
//! with cooperative scheduling: nothing in here takes a lock around the frame pool, the page
//! tables or the working set.

extern crate alloc;

mod address;
mod address_space;
mod backing_store;
mod bitmap;
mod config;
mod executable;
mod fault;
mod frame_pool;
mod machine;
mod memory;
mod numbers;
mod page_table;
mod policy;
mod space_id;
mod vm;
mod working_set;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, LoadError, SegmentLayout};
pub use backing_store::{FileSystem, MemFile, MemFileSystem, OpenFile, StoreError};
pub use bitmap::BitMap;
pub use config::{ConfigError, PolicyKind, VmConfig};
pub use executable::{ImageBuilder, ImageError, NOFF_MAGIC, NoffHeader, Segment};
pub use fault::{FaultError, FaultOutcome};
pub use frame_pool::{BitmapFrames, FrameAllocator};
pub use machine::{Access, Exception, NUM_REGISTERS, STACK_REGISTER, UserContext};
pub use memory::PhysicalMemory;
pub use numbers::{FrameNumber, PageNumber};
pub use page_table::{
    ENTRIES_PER_BLOCK, MAX_BLOCKS, MAX_PAGES, PageState, PageTable, PageTableEntry, PteFlags,
};
pub use policy::{PageBits, ReplacementError, ReplacementPolicy};
pub use space_id::{SpaceId, SpaceIdPool};
pub use vm::{InvariantViolation, VirtualMemory, VmStats};
pub use working_set::{ResidentPage, WorkingSet};

/// Size of a virtual page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 128;

/// Divides `value` by `divisor`, rounding up.
#[inline]
pub(crate) const fn div_round_up(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor)
}
