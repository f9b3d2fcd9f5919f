//! Per-address-space page tables.
//!
//! A page table is a two-level arena: a directory of fixed-size blocks of entries, indexed by
//! virtual page number. Blocks are only allocated as far as the address space reaches, so a
//! small program does not pay for the largest table.
//!
//! Each entry moves through the residency states of [`PageState`]:
//!
//! ```text
//!   NotResident --fault--> ResidentClean --write--> ResidentDirty
//!        ^                      |                        |
//!        +------evict-----------+----evict (write-back)--+
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::{FrameNumber, PageNumber};

/// Number of entries in one block of the page table arena.
pub const ENTRIES_PER_BLOCK: usize = 32;

/// Maximum number of blocks in a page table directory.
pub const MAX_BLOCKS: usize = 32;

/// The largest address space a page table can index, in pages.
pub const MAX_PAGES: usize = ENTRIES_PER_BLOCK * MAX_BLOCKS;

bitflags! {
    /// Status bits of a page table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PteFlags: u8 {
        /// The page is resident and the entry's frame may be used for translation.
        const VALID = 1 << 0;
        /// The page was accessed since the bit was last cleared.
        const REFERENCED = 1 << 1;
        /// The page was written since it was loaded.
        const DIRTY = 1 << 2;
    }
}

/// Residency state of a virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    /// Beyond the end of the address space. Accessing it is fatal.
    Unmapped,
    /// Inside the address space but not in a frame.
    NotResident,
    /// In a frame, identical to its swap copy.
    ResidentClean,
    /// In a frame and modified since it was loaded.
    ResidentDirty,
}

impl PageState {
    /// Returns true if the page occupies a frame.
    pub const fn is_resident(self) -> bool {
        matches!(self, PageState::ResidentClean | PageState::ResidentDirty)
    }
}

/// A page table entry.
///
/// The frame is only reachable through [`frame`](Self::frame) while the entry is valid, which
/// keeps "valid implies a frame is present" true by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    virtual_page: PageNumber,
    frame: Option<FrameNumber>,
    flags: PteFlags,
}

impl PageTableEntry {
    /// Creates a not-resident entry for `virtual_page`.
    pub const fn new(virtual_page: PageNumber) -> Self {
        Self {
            virtual_page,
            frame: None,
            flags: PteFlags::empty(),
        }
    }

    /// Returns the virtual page this entry translates.
    pub fn virtual_page(&self) -> PageNumber {
        self.virtual_page
    }

    /// Returns the frame holding the page, if it is resident.
    pub fn frame(&self) -> Option<FrameNumber> {
        if self.is_valid() { self.frame } else { None }
    }

    /// Returns the raw status bits.
    pub fn flags(&self) -> PteFlags {
        self.flags
    }

    /// Returns true if the page is resident.
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    /// Returns true if the page was accessed since the bit was last cleared.
    pub fn is_referenced(&self) -> bool {
        self.flags.contains(PteFlags::REFERENCED)
    }

    /// Returns true if the page was written since it was loaded.
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PteFlags::DIRTY)
    }

    /// Returns the residency state of the page.
    pub fn state(&self) -> PageState {
        match (self.is_valid(), self.is_dirty()) {
            (false, _) => PageState::NotResident,
            (true, false) => PageState::ResidentClean,
            (true, true) => PageState::ResidentDirty,
        }
    }

    /// Makes the page resident in `frame`, clean, with the referenced bit as given.
    pub fn map(&mut self, frame: FrameNumber, referenced: bool) {
        self.frame = Some(frame);
        self.flags.remove(PteFlags::DIRTY | PteFlags::REFERENCED);
        self.flags.insert(PteFlags::VALID);
        self.flags.set(PteFlags::REFERENCED, referenced);
    }

    /// Makes the page not resident, returning the frame it occupied.
    pub fn unmap(&mut self) -> Option<FrameNumber> {
        let frame = self.frame();
        self.frame = None;
        self.flags
            .remove(PteFlags::VALID | PteFlags::REFERENCED | PteFlags::DIRTY);
        frame
    }

    /// Records an access, as the MMU does on every translation.
    pub fn touch(&mut self, write: bool) {
        self.flags.insert(PteFlags::REFERENCED);
        if write {
            self.flags.insert(PteFlags::DIRTY);
        }
    }

    /// Clears the referenced bit.
    pub fn clear_referenced(&mut self) {
        self.flags.remove(PteFlags::REFERENCED);
    }
}

type Block = Box<[PageTableEntry; ENTRIES_PER_BLOCK]>;

/// The page table of one address space.
pub struct PageTable {
    directory: Vec<Block>,
    num_pages: usize,
}

impl PageTable {
    /// Creates a table of `num_pages` not-resident entries.
    ///
    /// Returns `None` if `num_pages` exceeds [`MAX_PAGES`].
    pub fn new(num_pages: usize) -> Option<Self> {
        if num_pages > MAX_PAGES {
            return None;
        }

        let directory = (0..num_pages.div_ceil(ENTRIES_PER_BLOCK))
            .map(|block| -> Block {
                let base = block * ENTRIES_PER_BLOCK;
                Box::new(core::array::from_fn(|i| {
                    PageTableEntry::new(PageNumber::new(base + i))
                }))
            })
            .collect();

        Some(Self {
            directory,
            num_pages,
        })
    }

    /// Returns the number of pages in the address space.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Returns the entry for `page`, or `None` if the page is beyond the end of the space.
    pub fn entry(&self, page: PageNumber) -> Option<&PageTableEntry> {
        let (block, index) = self.locate(page)?;
        Some(&self.directory[block][index])
    }

    /// Returns the entry for `page` for modification.
    pub fn entry_mut(&mut self, page: PageNumber) -> Option<&mut PageTableEntry> {
        let (block, index) = self.locate(page)?;
        Some(&mut self.directory[block][index])
    }

    /// Returns the residency state of `page`.
    pub fn state(&self, page: PageNumber) -> PageState {
        self.entry(page)
            .map_or(PageState::Unmapped, PageTableEntry::state)
    }

    /// Iterates over every entry in page order.
    pub fn iter(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.directory
            .iter()
            .flat_map(|block| block.iter())
            .take(self.num_pages)
    }

    /// Iterates over every entry in page order, for modification.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PageTableEntry> {
        let num_pages = self.num_pages;
        self.directory
            .iter_mut()
            .flat_map(|block| block.iter_mut())
            .take(num_pages)
    }

    /// Counts the resident entries.
    pub fn resident_count(&self) -> usize {
        self.iter().filter(|entry| entry.is_valid()).count()
    }

    fn locate(&self, page: PageNumber) -> Option<(usize, usize)> {
        let page = page.as_usize();
        if page >= self.num_pages {
            return None;
        }
        Some((page / ENTRIES_PER_BLOCK, page % ENTRIES_PER_BLOCK))
    }
}

impl fmt::Display for PageTable {
    /// Dumps the table, one entry per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "page table: {} pages, {} resident",
            self.num_pages,
            self.resident_count()
        )?;
        writeln!(f, "  vpage  frame  valid  use  dirty")?;
        for entry in self.iter() {
            let vpage = entry.virtual_page().as_usize();
            match entry.frame() {
                Some(frame) => write!(f, "  {:>5}  {:>5}", vpage, frame.as_usize())?,
                None => write!(f, "  {:>5}  {:>5}", vpage, "-")?,
            }
            let flags = entry.flags();
            writeln!(
                f,
                "  {:>5}  {:>3}  {:>5}",
                flags.contains(PteFlags::VALID) as u8,
                flags.contains(PteFlags::REFERENCED) as u8,
                flags.contains(PteFlags::DIRTY) as u8
            )?;
        }
        Ok(())
    }
}
