//! Page fault service.
//!
//! The trap dispatcher calls [`VirtualMemory::handle_page_fault`] on the faulting thread
//! with the faulting address and the space it belongs to. When the handler returns `Ok` the
//! faulting instruction is re-executed; any error ends the faulting program.
//!
//! Everything between picking a victim and mapping the replacement runs without yielding,
//! so no other thread can observe the moment where neither page is valid.

use thiserror::Error;

use crate::policy::ReplacementError;
use crate::vm::ArenaBits;
use crate::{
    FileSystem, FrameAllocator, FrameNumber, OpenFile, PageNumber, ResidentPage, SpaceId,
    StoreError, VirtualAddress, VirtualMemory,
};

/// Errors raised while servicing a fault or a user memory access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultError {
    /// No live space has this identifier.
    #[error("no address space {0}")]
    UnknownSpace(SpaceId),
    /// The address lies beyond the end of the space.
    #[error("space {space}: address {address} is in page {page}, beyond its {num_pages} pages")]
    UnmappedAddress {
        space: SpaceId,
        address: VirtualAddress,
        page: PageNumber,
        num_pages: usize,
    },
    /// No free frame and no page that may be evicted.
    #[error("space {0}: no free frame and nothing to evict")]
    AllocationExhausted(SpaceId),
    /// The replacement strategy failed despite eligible pages.
    #[error(transparent)]
    Replacement(#[from] ReplacementError),
    /// A swap transfer came up short.
    #[error("swap region: {0}")]
    BackingStore(#[from] StoreError),
    /// A non-resident page of a space that has no swap region.
    #[error("space {0} has no swap region")]
    MissingSwap(SpaceId),
    /// The working set named a page that is not resident.
    #[error("working set entry {0:?} is not resident")]
    StaleWorkingSet(ResidentPage),
}

impl FaultError {
    /// Returns true if the faulting program must be terminated.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FaultError::UnknownSpace(_))
    }
}

/// How a fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The page was already resident; nothing was done.
    AlreadyResident,
    /// The page was loaded into a free frame.
    Loaded { frame: FrameNumber },
    /// The page replaced `victim` in its frame.
    Replaced {
        frame: FrameNumber,
        victim: ResidentPage,
        wrote_back: bool,
    },
}

impl<F: FileSystem, A: FrameAllocator> VirtualMemory<F, A> {
    /// Resolves a page fault at `address` in space `id`.
    ///
    /// A free frame is used while the space is below its residency ceiling. Otherwise a
    /// victim is evicted: only the space's own pages are eligible when it is at its ceiling,
    /// any resident page when the frame pool is exhausted. A dirty victim is written back to
    /// its owner's swap region before the frame is reused.
    pub fn handle_page_fault(
        &mut self,
        id: SpaceId,
        address: VirtualAddress,
    ) -> Result<FaultOutcome, FaultError> {
        self.stats.page_faults += 1;

        let space = self.space(id).ok_or(FaultError::UnknownSpace(id))?;
        let page = address.page_number();
        let num_pages = space.num_pages();
        if page.as_usize() >= num_pages {
            log::error!(
                "space {id}: fault at {address} (page {page}) beyond the last of {num_pages} pages"
            );
            return Err(FaultError::UnmappedAddress {
                space: id,
                address,
                page,
                num_pages,
            });
        }
        if space.page_table().state(page).is_resident() {
            log::debug!("space {id}: page {page} already resident");
            return Ok(FaultOutcome::AlreadyResident);
        }
        if !space.is_demand_paged() {
            log::error!("space {id}: page {page} not resident and no swap region");
            return Err(FaultError::MissingSwap(id));
        }

        let at_ceiling = space.resident_count() >= self.config.max_resident;
        if !at_ceiling {
            if let Some(frame) = self.frames.find() {
                self.swap_in(id, page, frame)?;
                self.enter_working_set(ResidentPage::new(id, page));
                log::debug!("space {id}: page {page} loaded into free frame {frame}");
                return Ok(FaultOutcome::Loaded { frame });
            }
        }

        let eligible = move |candidate: ResidentPage| !at_ceiling || candidate.space == id;
        if !self.working_set.iter().any(eligible) {
            log::warn!(
                "space {id}: fault on page {page} with no free frame and no evictable page"
            );
            return Err(FaultError::AllocationExhausted(id));
        }

        let index = self.policy.select_victim(
            &self.working_set,
            &mut ArenaBits(&mut self.spaces),
            &eligible,
        )?;
        let (victim, frame, wrote_back) = self.evict(id, index)?;
        self.swap_in(id, page, frame)?;
        self.enter_working_set(ResidentPage::new(id, page));

        log::debug!(
            "space {id}: page {page} replaced {victim:?} in frame {frame} ({}, {})",
            if at_ceiling { "local" } else { "global" },
            if wrote_back { "written back" } else { "clean" }
        );
        Ok(FaultOutcome::Replaced {
            frame,
            victim,
            wrote_back,
        })
    }

    /// Evicts the working-set entry at `index`, writing it back first if it is dirty.
    /// Returns the victim, the frame it freed, and whether it was written back.
    fn evict(
        &mut self,
        id: SpaceId,
        index: usize,
    ) -> Result<(ResidentPage, FrameNumber, bool), FaultError> {
        let victim = self
            .working_set
            .get(index)
            .ok_or(FaultError::AllocationExhausted(id))?;
        let owner = self
            .spaces
            .get_mut(victim.space.as_usize())
            .and_then(Option::as_mut)
            .ok_or(FaultError::StaleWorkingSet(victim))?;
        let entry = *owner
            .page_table()
            .entry(victim.page)
            .ok_or(FaultError::StaleWorkingSet(victim))?;
        let frame = entry.frame().ok_or(FaultError::StaleWorkingSet(victim))?;

        let wrote_back = entry.is_dirty();
        if wrote_back {
            let swap = owner
                .swap_mut()
                .ok_or(FaultError::MissingSwap(victim.space))?;
            swap.write_all_at(self.memory.frame(frame), victim.page.byte_offset())
                .inspect_err(|err| log::error!("write-back of {victim:?} failed: {err}"))?;
            self.stats.write_backs += 1;
            log::trace!("wrote back {victim:?} from frame {frame}");
        }

        owner.unmap(victim.page);
        self.leave_working_set(index);
        self.stats.evictions += 1;
        Ok((victim, frame, wrote_back))
    }

    /// Reads `page` of space `id` from its swap region into `frame` and maps it. The frame
    /// goes back to the pool if the read fails.
    fn swap_in(
        &mut self,
        id: SpaceId,
        page: PageNumber,
        frame: FrameNumber,
    ) -> Result<(), FaultError> {
        let Some(space) = self.spaces.get_mut(id.as_usize()).and_then(Option::as_mut) else {
            self.frames.clear(frame);
            return Err(FaultError::UnknownSpace(id));
        };
        let Some(swap) = space.swap() else {
            self.frames.clear(frame);
            return Err(FaultError::MissingSwap(id));
        };
        if let Err(err) = swap.read_exact_at(self.memory.frame_mut(frame), page.byte_offset()) {
            log::error!("space {id}: reading page {page} from swap failed: {err}");
            self.frames.clear(frame);
            return Err(err.into());
        }

        space.map(page, frame, true);
        self.stats.swap_ins += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::testing::*;
    use crate::{MemFile, MemFileSystem, PAGE_SIZE, PageState, PolicyKind, VmConfig};

    fn state(vm: &VirtualMemory<MemFileSystem>, id: SpaceId, vpn: usize) -> PageState {
        vm.space(id)
            .unwrap()
            .page_table()
            .state(PageNumber::new(vpn))
    }

    fn fault(vm: &mut VirtualMemory<MemFileSystem>, id: SpaceId, vpn: usize) -> FaultOutcome {
        let outcome = vm
            .handle_page_fault(id, PageNumber::new(vpn).start())
            .unwrap();
        assert_eq!(vm.check_invariants(), Ok(()));
        outcome
    }

    #[test]
    fn fifo_scenario() {
        let mut vm = vm(config(8, 4, 4));
        let id = vm.create(&program(20)).unwrap();
        for vpn in 0..4 {
            assert_eq!(state(&vm, id, vpn), PageState::ResidentClean);
        }

        let outcome = fault(&mut vm, id, 4);
        assert!(matches!(
            outcome,
            FaultOutcome::Replaced { victim, wrote_back: false, .. }
                if victim == ResidentPage::new(id, PageNumber::new(0))
        ));
        assert_eq!(state(&vm, id, 0), PageState::NotResident);
        assert_eq!(state(&vm, id, 4), PageState::ResidentClean);

        let outcome = fault(&mut vm, id, 0);
        assert!(matches!(
            outcome,
            FaultOutcome::Replaced { victim, .. }
                if victim == ResidentPage::new(id, PageNumber::new(1))
        ));
        assert_eq!(vm.stats().write_backs, 0);
        assert_eq!(vm.stats().evictions, 2);
    }

    #[test]
    fn loads_into_free_frame_below_ceiling() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();

        let FaultOutcome::Loaded { frame } = fault(&mut vm, id, 5) else {
            panic!("expected a free frame");
        };
        assert!(vm.memory().frame(frame).iter().all(|b| *b == 5));
        let entry = *vm.space(id).unwrap().page_table().entry(PageNumber::new(5)).unwrap();
        assert!(entry.is_referenced());
        assert!(!entry.is_dirty());
        assert_eq!(vm.space(id).unwrap().resident_count(), 3);
        assert_eq!(vm.stats().swap_ins, 1);
    }

    #[test]
    fn resident_page_fault_is_a_no_op() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();
        assert_eq!(fault(&mut vm, id, 1), FaultOutcome::AlreadyResident);
        assert_eq!(vm.frames().num_used(), 2);
    }

    #[test]
    fn unmapped_address_allocates_nothing() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();
        let used = vm.frames().num_used();

        let err = vm
            .handle_page_fault(id, VirtualAddress::new(6 * PAGE_SIZE))
            .unwrap_err();
        assert!(matches!(err, FaultError::UnmappedAddress { num_pages: 6, .. }));
        assert!(err.is_fatal());
        assert_eq!(vm.frames().num_used(), used);
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn unknown_space_is_not_fatal() {
        let mut vm = vm(config(8, 4, 2));
        let err = vm
            .handle_page_fault(SpaceId::new(3), VirtualAddress::new(0))
            .unwrap_err();
        assert_eq!(err, FaultError::UnknownSpace(SpaceId::new(3)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn dirty_victim_is_written_back_once() {
        let mut vm = vm(config(8, 2, 2));
        let id = vm.create(&program(6)).unwrap();
        let frame = vm
            .space(id)
            .unwrap()
            .page_table()
            .entry(PageNumber::new(0))
            .and_then(|entry| entry.frame())
            .unwrap();
        vm.memory.frame_mut(frame).fill(0xEE);
        vm.space_mut(id)
            .unwrap()
            .page_table_mut()
            .entry_mut(PageNumber::new(0))
            .unwrap()
            .touch(true);

        let outcome = fault(&mut vm, id, 2);
        assert!(matches!(outcome, FaultOutcome::Replaced { wrote_back: true, .. }));
        assert_eq!(vm.stats().write_backs, 1);

        let swap = vm.fs().open("SWAP.0").unwrap().to_vec();
        assert!(swap[..PAGE_SIZE].iter().all(|b| *b == 0xEE));

        // Page 1 is clean: no further write-back.
        let outcome = fault(&mut vm, id, 3);
        assert!(matches!(outcome, FaultOutcome::Replaced { wrote_back: false, .. }));
        assert_eq!(vm.stats().write_backs, 1);

        // The written page comes back with its new contents.
        let FaultOutcome::Replaced { frame, .. } = fault(&mut vm, id, 0) else {
            panic!("expected a replacement");
        };
        assert!(vm.memory().frame(frame).iter().all(|b| *b == 0xEE));
    }

    #[test]
    fn full_pool_evicts_from_other_spaces() {
        let mut vm = vm(config(4, 4, 2));
        let a = vm.create(&program(6)).unwrap();
        let b = vm.create(&program(6)).unwrap();
        assert_eq!(vm.frames().num_clear(), 0);

        let outcome = fault(&mut vm, b, 4);
        assert!(matches!(
            outcome,
            FaultOutcome::Replaced { victim, .. }
                if victim == ResidentPage::new(a, PageNumber::new(0))
        ));
        assert_eq!(vm.space(a).unwrap().resident_count(), 1);
        assert_eq!(vm.space(b).unwrap().resident_count(), 3);
    }

    #[test]
    fn ceiling_keeps_replacement_local() {
        let mut vm = vm(config(8, 2, 2));
        let a = vm.create(&program(6)).unwrap();
        let b = vm.create(&program(6)).unwrap();

        let outcome = fault(&mut vm, b, 3);
        assert!(matches!(
            outcome,
            FaultOutcome::Replaced { victim, .. } if victim.space == b
        ));
        assert_eq!(vm.space(a).unwrap().resident_count(), 2);
    }

    #[test]
    fn nothing_to_evict_is_exhaustion() {
        // A pinned space holds every frame, so the demand-paged one has no victim.
        let mut vm = vm(config(2, 2, 2));
        vm.create(&program(2)).unwrap();
        vm.config.min_resident = 0;
        let id = vm.create(&program(3)).unwrap();
        assert_eq!(vm.space(id).unwrap().resident_count(), 0);

        let err = vm
            .handle_page_fault(id, VirtualAddress::new(0))
            .unwrap_err();
        assert_eq!(err, FaultError::AllocationExhausted(id));
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn short_swap_read_is_fatal_and_frees_the_frame() {
        let mut vm = vm(config(8, 4, 2));
        let id = vm.create(&program(6)).unwrap();
        if let Some(swap) = vm.space_mut(id).and_then(|space| space.swap_mut()) {
            *swap = MemFile::with_size(PAGE_SIZE);
        }

        let used = vm.frames().num_used();
        let err = vm
            .handle_page_fault(id, PageNumber::new(3).start())
            .unwrap_err();
        assert!(matches!(
            err,
            FaultError::BackingStore(StoreError::ShortRead { .. })
        ));
        assert!(err.is_fatal());
        assert_eq!(vm.frames().num_used(), used);
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn short_write_back_is_fatal_and_keeps_the_victim() {
        let mut vm = vm(config(8, 2, 2));
        let id = vm.create(&program(6)).unwrap();
        let space = vm.space_mut(id).unwrap();
        space
            .page_table_mut()
            .entry_mut(PageNumber::new(0))
            .unwrap()
            .touch(true);
        if let Some(swap) = space.swap_mut() {
            *swap = MemFile::with_size(0);
        }

        let used = vm.frames().num_used();
        let err = vm
            .handle_page_fault(id, PageNumber::new(2).start())
            .unwrap_err();
        assert!(matches!(
            err,
            FaultError::BackingStore(StoreError::ShortWrite { .. })
        ));
        assert!(err.is_fatal());
        assert_eq!(state(&vm, id, 0), PageState::ResidentDirty);
        assert_eq!(state(&vm, id, 2), PageState::NotResident);
        assert_eq!(vm.frames().num_used(), used);
        assert_eq!(vm.stats().write_backs, 0);
        assert_eq!(vm.check_invariants(), Ok(()));
    }

    #[test]
    fn every_policy_keeps_invariants_under_pressure() {
        for policy in PolicyKind::ALL {
            let mut vm = vm(VmConfig {
                policy,
                ..config(6, 3, 2)
            });
            let a = vm.create(&program(10)).unwrap();
            let b = vm.create(&program(10)).unwrap();
            for round in 0..40 {
                let id = if round % 3 == 0 { b } else { a };
                let vpn = (round * 7) % 10;
                vm.handle_page_fault(id, PageNumber::new(vpn).start())
                    .unwrap();
                assert_eq!(vm.check_invariants(), Ok(()), "{policy} round {round}");
                assert_eq!(
                    state(&vm, id, vpn),
                    PageState::ResidentClean,
                    "{policy} round {round}"
                );
            }
        }
    }
}
