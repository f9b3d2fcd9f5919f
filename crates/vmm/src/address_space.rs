//! Address spaces of user programs.
//!
//! An address space owns its page table, its residency count and, when it is demand paged,
//! the handle of its swap region. Creating and destroying spaces needs the shared frame pool
//! and identifier pool, so those operations live on [`VirtualMemory`](crate::VirtualMemory);
//! this module holds the per-space state and the pieces of loading that need no shared
//! state: decoding the header and assembling the virtual image.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use thiserror::Error;

use crate::{
    FrameNumber, ImageError, NoffHeader, OpenFile, PAGE_SIZE, PageNumber, PageTable, Segment,
    SpaceId, StoreError, VirtualAddress, div_round_up,
};

/// Errors that fail the creation of an address space. The kernel keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The executable header could not be decoded.
    #[error("bad executable: {0}")]
    BadImage(#[from] ImageError),
    /// Every space identifier is in use.
    #[error("no free address space identifiers")]
    NoSpaceIds,
    /// The program needs more pages than a page table can index.
    #[error("program needs {num_pages} pages, at most {max} are supported")]
    TooLarge { num_pages: usize, max: usize },
    /// A segment does not fit inside the address space.
    #[error("{segment} segment {start}..{end} lies outside the {size}-byte address space")]
    SegmentOutOfRange {
        segment: &'static str,
        start: VirtualAddress,
        end: VirtualAddress,
        size: usize,
    },
    /// The executable ended before a segment's bytes did.
    #[error("executable truncated: {segment} segment wants {expected} bytes at {offset:#x}, got {actual}")]
    TruncatedImage {
        segment: &'static str,
        offset: usize,
        expected: usize,
        actual: usize,
    },
    /// Not enough free frames for the eagerly loaded pages.
    #[error("need {needed} free frames to load, only {available} available")]
    OutOfFrames { needed: usize, available: usize },
    /// The swap region could not be set up.
    #[error("swap region: {0}")]
    Swap(#[from] StoreError),
}

/// Where a program's segments and stack live in its address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
    /// Bytes reserved for the user stack at the top of the space.
    pub stack_size: usize,
    /// Number of pages covering segments and stack.
    pub num_pages: usize,
}

impl SegmentLayout {
    /// Lays out the program described by `header` with a `stack_size`-byte stack.
    pub fn new(header: &NoffHeader, stack_size: usize) -> Self {
        Self {
            code: header.code,
            init_data: header.init_data,
            uninit_data: header.uninit_data,
            stack_size,
            num_pages: div_round_up(header.memory_size(stack_size), PAGE_SIZE),
        }
    }

    /// Returns the size of the address space in bytes.
    pub fn size(&self) -> usize {
        self.num_pages * PAGE_SIZE
    }

    /// Returns the lowest address of the stack region.
    pub fn stack_base(&self) -> VirtualAddress {
        VirtualAddress::new(self.size().saturating_sub(self.stack_size))
    }

    /// Returns the address one past the top of the stack.
    pub fn stack_top(&self) -> VirtualAddress {
        VirtualAddress::new(self.size())
    }

    fn loaded_segments(&self) -> [(&'static str, Segment); 2] {
        [("code", self.code), ("data", self.init_data)]
    }
}

/// Reads and decodes the header at the start of `executable`.
pub(crate) fn read_header<E: OpenFile + ?Sized>(executable: &E) -> Result<NoffHeader, LoadError> {
    let mut bytes = [0u8; NoffHeader::SIZE];
    let read = executable.read_at(&mut bytes, 0);
    Ok(NoffHeader::parse(&bytes[..read])?)
}

/// Builds the full virtual image: zero filled, with code and initialized data copied from
/// their file offsets to their virtual addresses.
pub(crate) fn assemble_image<E: OpenFile + ?Sized>(
    layout: &SegmentLayout,
    executable: &E,
) -> Result<Vec<u8>, LoadError> {
    let size = layout.size();
    let mut image = vec![0u8; size];

    for (name, segment) in layout.loaded_segments() {
        if segment.size == 0 {
            continue;
        }
        let start = segment.start().as_usize();
        let end = segment.end().as_usize();
        if end > size {
            return Err(LoadError::SegmentOutOfRange {
                segment: name,
                start: segment.start(),
                end: segment.end(),
                size,
            });
        }

        let offset = segment.in_file_addr as usize;
        let expected = end - start;
        let actual = executable.read_at(&mut image[start..end], offset);
        if actual != expected {
            return Err(LoadError::TruncatedImage {
                segment: name,
                offset,
                expected,
                actual,
            });
        }
        log::trace!("copied {name} segment: {expected} bytes from {offset:#x} to {start:#x}");
    }

    Ok(image)
}

/// Name of the swap region of space `id`.
pub(crate) fn swap_name(id: SpaceId) -> String {
    alloc::format!("SWAP.{id}")
}

/// A user program's address space.
pub struct AddressSpace<S> {
    id: SpaceId,
    layout: SegmentLayout,
    page_table: PageTable,
    resident_count: usize,
    swap: Option<(String, S)>,
}

impl<S: OpenFile> AddressSpace<S> {
    pub(crate) fn new(
        id: SpaceId,
        layout: SegmentLayout,
        page_table: PageTable,
        swap: Option<(String, S)>,
    ) -> Self {
        Self {
            id,
            layout,
            page_table,
            resident_count: 0,
            swap,
        }
    }

    /// Returns the space's identifier.
    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Returns the segment layout.
    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// Returns the number of pages in the space.
    pub fn num_pages(&self) -> usize {
        self.page_table.num_pages()
    }

    /// Returns the page table.
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub(crate) fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    /// Returns the number of the space's pages that occupy frames.
    pub fn resident_count(&self) -> usize {
        self.resident_count
    }

    /// Returns true if pages of this space are loaded on demand from a swap region.
    ///
    /// Spaces that are not demand paged are fully resident for their whole life.
    pub fn is_demand_paged(&self) -> bool {
        self.swap.is_some()
    }

    /// Returns the name of the swap region, if the space has one.
    pub fn swap_name(&self) -> Option<&str> {
        self.swap.as_ref().map(|(name, _)| name.as_str())
    }

    pub(crate) fn swap(&self) -> Option<&S> {
        self.swap.as_ref().map(|(_, file)| file)
    }

    pub(crate) fn swap_mut(&mut self) -> Option<&mut S> {
        self.swap.as_mut().map(|(_, file)| file)
    }

    /// Makes `page` resident in `frame`.
    pub(crate) fn map(&mut self, page: PageNumber, frame: FrameNumber, referenced: bool) {
        if let Some(entry) = self.page_table.entry_mut(page) {
            debug_assert!(!entry.is_valid(), "mapping a resident page");
            entry.map(frame, referenced);
            self.resident_count += 1;
        }
    }

    /// Makes `page` not resident, returning the frame it held.
    pub(crate) fn unmap(&mut self, page: PageNumber) -> Option<FrameNumber> {
        let frame = self.page_table.entry_mut(page)?.unmap()?;
        self.resident_count -= 1;
        Some(frame)
    }

    /// Unmaps every resident page, returning the frames they held.
    pub(crate) fn unmap_all(&mut self) -> Vec<FrameNumber> {
        let frames: Vec<FrameNumber> = self
            .page_table
            .iter_mut()
            .filter_map(|entry| entry.unmap())
            .collect();
        self.resident_count = 0;
        frames
    }

    pub(crate) fn into_swap(self) -> Option<(String, S)> {
        self.swap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageBuilder, MemFile};

    fn layout_of(image: &[u8], stack: usize) -> SegmentLayout {
        let header = NoffHeader::parse(image).unwrap();
        SegmentLayout::new(&header, stack)
    }

    #[test]
    fn page_count_covers_segments_and_stack() {
        let image = ImageBuilder::new().code(&[1; 200]).data(&[2; 50]).bss(10).build();
        let layout = layout_of(&image, 256);
        // 200 + 50 + 10 + 256 = 516 bytes.
        assert_eq!(layout.num_pages, 5);
        assert_eq!(layout.stack_top(), VirtualAddress::new(640));
        assert_eq!(layout.stack_base(), VirtualAddress::new(384));
    }

    #[test]
    fn image_places_segments_at_virtual_addresses() {
        let bytes = ImageBuilder::new().code(&[0xC0; 130]).data(&[0xDA; 5]).bss(3).build();
        let layout = layout_of(&bytes, 0);
        let image = assemble_image(&layout, &MemFile::from_bytes(bytes)).unwrap();

        assert_eq!(image.len(), 2 * PAGE_SIZE);
        assert!(image[..130].iter().all(|b| *b == 0xC0));
        assert!(image[130..135].iter().all(|b| *b == 0xDA));
        assert!(image[135..].iter().all(|b| *b == 0));
    }

    #[test]
    fn truncated_executable_is_rejected() {
        let mut bytes = ImageBuilder::new().code(&[1; 64]).build();
        bytes.truncate(NoffHeader::SIZE + 10);
        let layout = layout_of(&bytes, 0);
        assert_eq!(
            assemble_image(&layout, &MemFile::from_bytes(bytes)),
            Err(LoadError::TruncatedImage {
                segment: "code",
                offset: NoffHeader::SIZE,
                expected: 64,
                actual: 10,
            })
        );
    }

    #[test]
    fn segment_beyond_space_is_rejected() {
        let mut header = ImageBuilder::new().code(&[1; 8]).header();
        header.init_data = Segment::new(4096, 48, 8);
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[0; 16]);

        let layout = SegmentLayout::new(&header, 0);
        assert!(matches!(
            assemble_image(&layout, &MemFile::from_bytes(bytes)),
            Err(LoadError::SegmentOutOfRange { segment: "data", .. })
        ));
    }

    #[test]
    fn short_header_is_a_bad_image() {
        let file = MemFile::from_bytes(vec![0xAD, 0xDF]);
        assert_eq!(
            read_header(&file),
            Err(LoadError::BadImage(ImageError::Truncated(2)))
        );
    }

    #[test]
    fn map_and_unmap_track_residency() {
        let image = ImageBuilder::new().code(&[1; 300]).build();
        let layout = layout_of(&image, 0);
        let table = PageTable::new(layout.num_pages).unwrap();
        let mut space: AddressSpace<MemFile> =
            AddressSpace::new(SpaceId::new(0), layout, table, None);

        space.map(PageNumber::new(0), FrameNumber::new(4), false);
        space.map(PageNumber::new(2), FrameNumber::new(1), true);
        assert_eq!(space.resident_count(), 2);
        assert!(!space.is_demand_paged());

        assert_eq!(space.unmap(PageNumber::new(2)), Some(FrameNumber::new(1)));
        assert_eq!(space.unmap(PageNumber::new(2)), None);
        assert_eq!(space.unmap_all(), vec![FrameNumber::new(4)]);
        assert_eq!(space.resident_count(), 0);
    }
}
