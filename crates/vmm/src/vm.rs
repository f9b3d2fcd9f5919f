//! The virtual memory context.

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use thiserror::Error;

use crate::address_space::{assemble_image, read_header, swap_name};
use crate::policy::{self, PageBits, ReplacementPolicy};
use crate::{
    AddressSpace, BitmapFrames, ConfigError, FileSystem, FrameAllocator, FrameNumber, LoadError,
    MAX_PAGES, OpenFile, PAGE_SIZE, PageNumber, PageTable, PageTableEntry, PhysicalMemory,
    PolicyKind, ResidentPage, SegmentLayout, SpaceId, SpaceIdPool, StoreError, VmConfig,
    WorkingSet,
};

/// Counters accumulated by a [`VirtualMemory`] context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Calls into the fault handler.
    pub page_faults: u64,
    /// Pages loaded when a space was created.
    pub eager_loads: u64,
    /// Pages read from a swap region by the fault handler.
    pub swap_ins: u64,
    /// Pages evicted to make room.
    pub evictions: u64,
    /// Dirty victims written back to swap.
    pub write_backs: u64,
}

impl fmt::Display for VmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} eager={} swap-ins={} evictions={} write-backs={}",
            self.page_faults, self.eager_loads, self.swap_ins, self.evictions, self.write_backs
        )
    }
}

/// A broken global invariant, reported by [`VirtualMemory::check_invariants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{used} frames allocated but {resident} pages resident")]
    FrameCountMismatch { used: usize, resident: usize },
    #[error("frame {0} is held by more than one valid entry")]
    FrameSharedTwice(FrameNumber),
    #[error("frame {0} is mapped but free in the pool")]
    FrameNotAllocated(FrameNumber),
    #[error("space {space} records {recorded} resident pages, its table has {actual}")]
    ResidentCountMismatch {
        space: SpaceId,
        recorded: usize,
        actual: usize,
    },
    #[error("space {space} holds {resident} pages, above the ceiling of {ceiling}")]
    CeilingExceeded {
        space: SpaceId,
        resident: usize,
        ceiling: usize,
    },
    #[error("working set entry {0:?} is not a resident page of a live space")]
    StaleWorkingSetEntry(ResidentPage),
    #[error("working set lists {0:?} twice")]
    DuplicateWorkingSetEntry(ResidentPage),
    #[error("resident page {0:?} of a demand-paged space is missing from the working set")]
    UntrackedPage(ResidentPage),
}

/// Owns every piece of shared paging state: the frame pool and main memory, the address
/// space identifiers and the spaces themselves, the working set with its replacement
/// strategy, and the file system holding executables and swap regions.
///
/// Address spaces are referred to by [`SpaceId`]; the context resolves them, so a fault in
/// one space can evict a page of another without the spaces referencing each other.
pub struct VirtualMemory<F: FileSystem, A: FrameAllocator = BitmapFrames> {
    pub(crate) config: VmConfig,
    pub(crate) frames: A,
    pub(crate) memory: PhysicalMemory,
    pub(crate) ids: SpaceIdPool,
    pub(crate) spaces: Vec<Option<AddressSpace<F::File>>>,
    pub(crate) working_set: WorkingSet,
    pub(crate) policy: Box<dyn ReplacementPolicy>,
    pub(crate) fs: F,
    pub(crate) stats: VmStats,
}

impl<F: FileSystem> VirtualMemory<F> {
    /// Creates a context with a bitmap frame pool of `config.num_frames` frames.
    pub fn new(config: VmConfig, fs: F) -> Result<Self, ConfigError> {
        Self::with_allocator(config, fs, BitmapFrames::new(config.num_frames))
    }
}

impl<F: FileSystem, A: FrameAllocator> VirtualMemory<F, A> {
    /// Creates a context around an existing frame allocator. Main memory is sized to the
    /// allocator's capacity.
    pub fn with_allocator(mut config: VmConfig, fs: F, frames: A) -> Result<Self, ConfigError> {
        config.num_frames = frames.capacity();
        config.validate()?;

        log::info!(
            "virtual memory: {} frames of {} bytes, ceiling {} pages per space, {} replacement",
            config.num_frames,
            PAGE_SIZE,
            config.max_resident,
            config.policy
        );

        let mut spaces = Vec::with_capacity(config.max_spaces);
        spaces.resize_with(config.max_spaces, || None);

        Ok(Self {
            memory: PhysicalMemory::new(config.num_frames),
            ids: SpaceIdPool::new(config.max_spaces),
            spaces,
            working_set: WorkingSet::new(config.num_frames),
            policy: policy::build(config.policy, config.seed),
            frames,
            fs,
            config,
            stats: VmStats::default(),
        })
    }

    /// Returns the configuration in effect.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Returns the replacement strategy in effect.
    pub fn policy_kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    /// Returns the accumulated counters.
    pub fn stats(&self) -> VmStats {
        self.stats
    }

    /// Returns the frame allocator.
    pub fn frames(&self) -> &A {
        &self.frames
    }

    /// Returns main memory.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Returns the working set.
    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    /// Returns the file system.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Returns the file system for modification, e.g. to add executables.
    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    /// Returns a live address space.
    pub fn space(&self, id: SpaceId) -> Option<&AddressSpace<F::File>> {
        self.spaces.get(id.as_usize())?.as_ref()
    }

    pub(crate) fn space_mut(&mut self, id: SpaceId) -> Option<&mut AddressSpace<F::File>> {
        self.spaces.get_mut(id.as_usize())?.as_mut()
    }

    /// Iterates over the live address spaces.
    pub fn spaces(&self) -> impl Iterator<Item = &AddressSpace<F::File>> {
        self.spaces.iter().flatten()
    }

    /// Creates an address space for the program in `executable`.
    ///
    /// Programs larger than `min_resident` pages are demand paged: the first
    /// `min(min_resident, max_resident)` pages are loaded now and the whole virtual image is
    /// written to a fresh swap region. Smaller programs are loaded completely and stay
    /// resident until destroyed.
    pub fn create<E: OpenFile + ?Sized>(&mut self, executable: &E) -> Result<SpaceId, LoadError> {
        let header = read_header(executable)?;
        let layout = SegmentLayout::new(&header, self.config.user_stack_size);
        let num_pages = layout.num_pages;
        let page_table = PageTable::new(num_pages).ok_or(LoadError::TooLarge {
            num_pages,
            max: MAX_PAGES,
        })?;
        let image = assemble_image(&layout, executable)?;

        let demand_paged = num_pages > self.config.min_resident;
        let eager = if demand_paged {
            self.config.eager_pages().min(num_pages)
        } else {
            num_pages
        };
        let available = self.frames.num_clear();
        if available < eager {
            log::warn!(
                "cannot load a {num_pages}-page program: {eager} frames needed, {available} free"
            );
            return Err(LoadError::OutOfFrames {
                needed: eager,
                available,
            });
        }

        let id = self.ids.allocate().ok_or(LoadError::NoSpaceIds)?;
        let swap = if demand_paged {
            match self.create_swap(id, &image) {
                Ok(swap) => Some(swap),
                Err(err) => {
                    self.ids.release(id);
                    return Err(err.into());
                }
            }
        } else {
            None
        };
        self.spaces[id.as_usize()] = Some(AddressSpace::new(id, layout, page_table, swap));

        for vpn in 0..eager {
            let page = PageNumber::new(vpn);
            let Some(frame) = self.frames.find() else {
                let available = self.frames.num_clear();
                self.destroy(id);
                return Err(LoadError::OutOfFrames {
                    needed: eager,
                    available,
                });
            };

            let start = page.byte_offset();
            self.memory
                .frame_mut(frame)
                .copy_from_slice(&image[start..start + PAGE_SIZE]);
            if let Some(space) = self.space_mut(id) {
                space.map(page, frame, false);
            }
            if demand_paged {
                self.enter_working_set(ResidentPage::new(id, page));
            }
            self.stats.eager_loads += 1;
            log::debug!("space {id}: page {page} loaded eagerly into frame {frame}");
        }

        log::info!(
            "space {id}: created with {num_pages} pages, {eager} resident, stack {}..{}, {}",
            layout.stack_base(),
            layout.stack_top(),
            if demand_paged { "demand paged" } else { "pinned" }
        );
        Ok(id)
    }

    fn create_swap(&mut self, id: SpaceId, image: &[u8]) -> Result<(String, F::File), StoreError> {
        let name = swap_name(id);
        self.fs.create(&name, image.len())?;
        let Some(mut file) = self.fs.open(&name) else {
            return Err(StoreError::NotFound(name));
        };
        if let Err(err) = file.write_all_at(image, 0) {
            self.fs.remove(&name);
            return Err(err);
        }
        log::debug!("space {id}: swap region {name} holds {} bytes", image.len());
        Ok((name, file))
    }

    /// Destroys an address space, returning its frames, its identifier and its swap region.
    ///
    /// Returns false if `id` does not name a live space.
    pub fn destroy(&mut self, id: SpaceId) -> bool {
        let Some(mut space) = self.spaces.get_mut(id.as_usize()).and_then(Option::take) else {
            return false;
        };

        for index in self.working_set.positions_of(id).into_iter().rev() {
            self.leave_working_set(index);
        }

        let frames = space.unmap_all();
        for frame in &frames {
            self.frames.clear(*frame);
        }

        if let Some((name, _)) = space.into_swap() {
            if !self.fs.remove(&name) {
                log::warn!("space {id}: swap region {name} was already gone");
            }
        }

        self.ids.release(id);
        log::info!("space {id}: destroyed, {} frames released", frames.len());
        true
    }

    /// Adds a newly resident page to the working set where the strategy wants it.
    pub(crate) fn enter_working_set(&mut self, page: ResidentPage) {
        let index = self.policy.placement(&self.working_set);
        self.working_set.insert(index, page);
        self.policy.page_inserted(index, self.working_set.len());
        self.policy.page_accessed(page);
    }

    /// Removes the page at `index` from the working set.
    pub(crate) fn leave_working_set(&mut self, index: usize) -> ResidentPage {
        let page = self.working_set.remove(index);
        self.policy.page_removed(index, page, self.working_set.len());
        page
    }

    /// Audits the global paging invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut held = BTreeSet::new();
        let mut resident = 0;

        for space in self.spaces() {
            let mut actual = 0;
            for entry in space.page_table().iter() {
                let Some(frame) = entry.frame() else {
                    continue;
                };
                if !held.insert(frame) {
                    return Err(InvariantViolation::FrameSharedTwice(frame));
                }
                if !self.frames.test(frame) {
                    return Err(InvariantViolation::FrameNotAllocated(frame));
                }
                actual += 1;

                let page = ResidentPage::new(space.id(), entry.virtual_page());
                if space.is_demand_paged() && self.working_set.position(page).is_none() {
                    return Err(InvariantViolation::UntrackedPage(page));
                }
            }

            if actual != space.resident_count() {
                return Err(InvariantViolation::ResidentCountMismatch {
                    space: space.id(),
                    recorded: space.resident_count(),
                    actual,
                });
            }
            if space.is_demand_paged() && actual > self.config.max_resident {
                return Err(InvariantViolation::CeilingExceeded {
                    space: space.id(),
                    resident: actual,
                    ceiling: self.config.max_resident,
                });
            }
            resident += actual;
        }

        let used = self.frames.num_used();
        if used != resident {
            return Err(InvariantViolation::FrameCountMismatch { used, resident });
        }

        let mut seen = BTreeSet::new();
        for page in self.working_set.iter() {
            if !seen.insert(page) {
                return Err(InvariantViolation::DuplicateWorkingSetEntry(page));
            }
            let valid = self
                .space(page.space)
                .and_then(|space| space.page_table().entry(page.page))
                .is_some_and(PageTableEntry::is_valid);
            if !valid {
                return Err(InvariantViolation::StaleWorkingSetEntry(page));
            }
        }

        Ok(())
    }
}

/// Status bits of resident pages, looked up through the space arena.
pub(crate) struct ArenaBits<'a, S>(pub &'a mut [Option<AddressSpace<S>>]);

impl<S: OpenFile> ArenaBits<'_, S> {
    fn entry(&self, page: ResidentPage) -> Option<&PageTableEntry> {
        self.0
            .get(page.space.as_usize())?
            .as_ref()?
            .page_table()
            .entry(page.page)
    }
}

impl<S: OpenFile> PageBits for ArenaBits<'_, S> {
    fn referenced(&self, page: ResidentPage) -> bool {
        self.entry(page).is_some_and(PageTableEntry::is_referenced)
    }

    fn dirty(&self, page: ResidentPage) -> bool {
        self.entry(page).is_some_and(PageTableEntry::is_dirty)
    }

    fn clear_referenced(&mut self, page: ResidentPage) {
        let entry = self
            .0
            .get_mut(page.space.as_usize())
            .and_then(Option::as_mut)
            .and_then(|space| space.page_table_mut().entry_mut(page.page));
        if let Some(entry) = entry {
            entry.clear_referenced();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::{MemFile, MemFileSystem, PageState};

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            VirtualMemory::new(config(0, 4, 4), MemFileSystem::new()),
            Err(ConfigError::NoFrames)
        ));
    }
    #[test]
    fn demand_paged_space_loads_eager_prefix() {
        let mut vm = vm(config(8, 4, 4));
        let id = vm.create(&program(20)).unwrap();
        let space = vm.space(id).unwrap();

        assert_eq!(space.num_pages(), 20);
        assert_eq!(space.resident_count(), 4);
        assert!(space.is_demand_paged());
        assert_eq!(space.swap_name(), Some("SWAP.0"));
        for vpn in 0..20 {
            let expected = if vpn < 4 {
                PageState::ResidentClean
            } else {
                PageState::NotResident
            };
            assert_eq!(space.page_table().state(PageNumber::new(vpn)), expected);
        }
        let first = space.page_table().entry(PageNumber::new(0)).unwrap();
        assert!(!first.is_referenced());

        assert_eq!(vm.working_set().len(), 4);
        assert_eq!(vm.stats().eager_loads, 4);
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn swap_region_mirrors_whole_image() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();

        let swap = vm.fs().open("SWAP.0").unwrap().to_vec();
        assert_eq!(swap.len(), 6 * PAGE_SIZE);
        for vpn in 0..6 {
            assert_eq!(swap[vpn * PAGE_SIZE], vpn as u8);
        }

        let frame = vm
            .space(id)
            .and_then(|space| space.page_table().entry(PageNumber::new(1)))
            .and_then(PageTableEntry::frame)
            .unwrap();
        assert!(vm.memory().frame(frame).iter().all(|b| *b == 1));
    }

    #[test]
    fn small_space_is_pinned_without_swap() {
        let mut vm = vm(config(8, 2, 4));
        let id = vm.create(&program(3)).unwrap();
        let space = vm.space(id).unwrap();

        assert!(!space.is_demand_paged());
        assert_eq!(space.resident_count(), 3);
        assert!(vm.fs().is_empty());
        assert!(vm.working_set().is_empty());
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn out_of_frames_releases_everything() {
        let mut vm = vm(config(3, 4, 4));
        assert_eq!(
            vm.create(&program(4)),
            Err(LoadError::OutOfFrames {
                needed: 4,
                available: 3
            })
        );
        assert_eq!(vm.spaces().count(), 0);
        assert_eq!(vm.frames().num_used(), 0);
        assert!(vm.fs().is_empty());
    }

    #[test]
    fn identifier_pool_exhaustion_fails_load() {
        let mut vm = vm(VmConfig {
            max_spaces: 1,
            ..config(8, 2, 1)
        });
        vm.create(&program(2)).unwrap();
        assert_eq!(vm.create(&program(2)), Err(LoadError::NoSpaceIds));
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn bad_image_fails_load() {
        let mut vm = vm(config(8, 2, 1));
        let junk = MemFile::from_bytes(vec![0x11; 64]);
        assert!(matches!(vm.create(&junk), Err(LoadError::BadImage(_))));
        assert_eq!(vm.ids.num_live(), 0);
    }

    #[test]
    fn oversized_program_fails_load() {
        let mut vm = vm(VmConfig {
            user_stack_size: (MAX_PAGES + 1) * PAGE_SIZE,
            ..config(8, 2, 1)
        });
        assert!(matches!(
            vm.create(&program(0)),
            Err(LoadError::TooLarge { max: MAX_PAGES, .. })
        ));
    }

    #[test]
    fn destroy_releases_frames_swap_and_id() {
        let mut vm = vm(config(8, 4, 2));
        let a = vm.create(&program(6)).unwrap();
        let b = vm.create(&program(2)).unwrap();
        assert_eq!(vm.frames().num_used(), 4);

        assert!(vm.destroy(a));
        assert!(!vm.destroy(a));
        assert_eq!(vm.frames().num_used(), 2);
        assert!(!vm.fs().contains("SWAP.0"));
        assert!(vm.working_set().is_empty());
        assert_eq!(vm.check_invariants(), Ok(()));

        // The identifier is reused.
        assert_eq!(vm.create(&program(6)), Ok(a));
        assert!(vm.destroy(b));
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn audit_catches_leaked_frame() {
        let mut vm = vm(config(8, 4, 2));
        vm.create(&program(6)).unwrap();
        vm.frames.find().unwrap();
        assert_eq!(
            vm.check_invariants(),
            Err(InvariantViolation::FrameCountMismatch {
                used: 3,
                resident: 2
            })
        );
    }

    #[test]
    fn audit_catches_stale_working_set_entry() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();
        let stale = ResidentPage::new(id, PageNumber::new(5));
        vm.working_set.push(stale);
        assert_eq!(
            vm.check_invariants(),
            Err(InvariantViolation::StaleWorkingSetEntry(stale))
        );
    }

    #[test]
    fn audit_catches_untracked_page() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();
        vm.leave_working_set(0);
        assert_eq!(
            vm.check_invariants(),
            Err(InvariantViolation::UntrackedPage(ResidentPage::new(
                id,
                PageNumber::new(0)
            )))
        );
    }
}
