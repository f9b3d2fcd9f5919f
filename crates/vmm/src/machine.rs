//! The memory manager's side of the CPU interface.
//!
//! [`VirtualMemory::install`] hands the CPU the initial register state of a program, and
//! [`VirtualMemory::translate`] does what the MMU does on every access: check the page
//! table, record the access in the entry's status bits, and raise a page fault when the
//! page is not resident. [`VirtualMemory::read_user`] and [`VirtualMemory::write_user`]
//! combine the two halves of the trap contract: translate, and on a page fault run the
//! handler and re-execute the access.

use crate::{
    FaultError, FileSystem, FrameAllocator, PhysicalAddress, ResidentPage, SpaceId,
    VirtualAddress, VirtualMemory,
};

/// Number of general purpose registers.
pub const NUM_REGISTERS: usize = 32;

/// Register holding the stack pointer.
pub const STACK_REGISTER: usize = 29;

/// Space left between the stack pointer and the end of the address space, so that the
/// first push does not run off the last page.
const STACK_SLACK: usize = 16;

/// The kind of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Why a translation did not produce a physical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    /// The page is not resident. The fault handler must run and the access be retried.
    PageFault(VirtualAddress),
    /// The access can never succeed.
    AddressError(FaultError),
}

/// Initial CPU state for a freshly installed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// The space whose page table the CPU now uses.
    pub space: SpaceId,
    /// Size of the page table handed over.
    pub num_pages: usize,
    pub registers: [u32; NUM_REGISTERS],
    pub pc: u32,
    pub next_pc: u32,
}

impl UserContext {
    /// Returns the stack pointer.
    pub fn sp(&self) -> u32 {
        self.registers[STACK_REGISTER]
    }
}

impl<F: FileSystem, A: FrameAllocator> VirtualMemory<F, A> {
    /// Returns the initial register state for running space `id`: every register zero,
    /// execution starting at address 0, and the stack pointer just below the top of the
    /// address space.
    pub fn install(&self, id: SpaceId) -> Result<UserContext, FaultError> {
        let space = self.space(id).ok_or(FaultError::UnknownSpace(id))?;
        let num_pages = space.num_pages();

        let mut registers = [0; NUM_REGISTERS];
        registers[STACK_REGISTER] =
            space.layout().stack_top().as_usize().saturating_sub(STACK_SLACK) as u32;
        log::debug!(
            "space {id}: installed {num_pages} pages, sp {:#x}",
            registers[STACK_REGISTER]
        );

        Ok(UserContext {
            space: id,
            num_pages,
            registers,
            pc: 0,
            next_pc: 4,
        })
    }

    /// Translates `address` in space `id` for an access of kind `access`.
    ///
    /// On success the entry is marked referenced, and dirty for writes.
    pub fn translate(
        &mut self,
        id: SpaceId,
        address: VirtualAddress,
        access: Access,
    ) -> Result<PhysicalAddress, Exception> {
        let space = self
            .space_mut(id)
            .ok_or(Exception::AddressError(FaultError::UnknownSpace(id)))?;
        let page = address.page_number();
        let num_pages = space.num_pages();
        let evictable = space.is_demand_paged();
        let Some(entry) = space.page_table_mut().entry_mut(page) else {
            return Err(Exception::AddressError(FaultError::UnmappedAddress {
                space: id,
                address,
                page,
                num_pages,
            }));
        };
        let Some(frame) = entry.frame() else {
            log::trace!("space {id}: page fault at {address}");
            return Err(Exception::PageFault(address));
        };

        entry.touch(access == Access::Write);
        let physical = frame.start() + address.page_offset();
        // Pinned pages never enter the working set, so the strategy never hears of them.
        if evictable {
            self.policy.page_accessed(ResidentPage::new(id, page));
        }
        Ok(physical)
    }

    /// Translates an address, servicing page faults until the access succeeds.
    fn translate_faulting(
        &mut self,
        id: SpaceId,
        address: VirtualAddress,
        access: Access,
    ) -> Result<PhysicalAddress, FaultError> {
        loop {
            match self.translate(id, address, access) {
                Ok(physical) => return Ok(physical),
                Err(Exception::PageFault(address)) => {
                    self.handle_page_fault(id, address)?;
                }
                Err(Exception::AddressError(err)) => return Err(err),
            }
        }
    }

    /// Copies `buf.len()` bytes of space `id`, starting at `address`, into `buf`.
    pub fn read_user(
        &mut self,
        id: SpaceId,
        address: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), FaultError> {
        for (offset, byte) in buf.iter_mut().enumerate() {
            let physical = self.translate_faulting(id, address + offset, Access::Read)?;
            *byte = self.memory.read_byte(physical);
        }
        Ok(())
    }

    /// Copies `buf` into space `id`, starting at `address`.
    pub fn write_user(
        &mut self,
        id: SpaceId,
        address: VirtualAddress,
        buf: &[u8],
    ) -> Result<(), FaultError> {
        for (offset, byte) in buf.iter().enumerate() {
            let physical = self.translate_faulting(id, address + offset, Access::Write)?;
            self.memory.write_byte(physical, *byte);
        }
        Ok(())
    }
}
