//! Superpage Promotion and Demotion
//!
//! Converts 4 MiB-aligned chunks of an address space between the Small
//! state (directory entry -> page table -> 1024 frames) and the Huge
//! state (directory entry with the large-page bit -> one contiguous
//! 4 MiB run). Transitions go one chunk at a time:
//!
//! 1. acquire the destination backing (huge run, or table + 1024 frames)
//! 2. copy the chunk's bytes across
//! 3. release the old backing to the frame pool
//! 4. rewrite the directory entry and flip the large-page bit
//! 5. reload the page-directory base to invalidate cached translations
//!
//! A call covering several chunks is not atomic: chunks transitioned
//! before a failure keep their new state and the first failure's status
//! is returned. The reload in step 5 only reaches the executing core;
//! this kernel assumes a process's mappings are observed only by the
//! core running it and performs no cross-core shoot-down.

use core::fmt;

use log::debug;

use super::address::{PhysAddr, VirtAddr, FRAMES_PER_HUGE, HUGE_PAGE_SIZE, PAGE_SIZE};
use super::hal::Machine;
use super::paging::{PageFlags, PageTableEntry};
use super::space::AddressSpace;

/// Failure kinds of promote/demote, one per state-machine step.
///
/// The discriminants are the status codes handed to the syscall layer
/// (0 is success).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VmOpError {
    /// Backing storage could not be allocated (pool or run exhaustion).
    AllocationFailed = 1,
    /// The chunk's current backing could not be read for copying.
    CopyFailed = 2,
    /// The chunk's old mapping structures could not be torn down.
    TeardownFailed = 3,
}

impl VmOpError {
    /// The integer status code reported across the syscall boundary.
    #[inline]
    pub const fn status(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for VmOpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "backing allocation failed"),
            Self::CopyFailed => write!(f, "copy from existing mapping failed"),
            Self::TeardownFailed => write!(f, "old mapping teardown failed"),
        }
    }
}

impl<'m, 'p, M: Machine> AddressSpace<'m, 'p, M> {
    /// Promote every whole 4 MiB chunk of `[va, va + len)` to a huge
    /// mapping.
    ///
    /// `va` is rounded up to the next 4 MiB boundary; bytes below the
    /// boundary and a tail smaller than 4 MiB stay Small. Chunks that
    /// are already Huge are skipped. On the first failing chunk the call
    /// stops and reports that chunk's error; earlier chunks keep their
    /// new Huge state.
    pub fn promote(&self, va: VirtAddr, len: usize) -> Result<(), VmOpError> {
        self.machine().enable_large_pages();
        let end = va.as_usize() + len;
        let mut chunk = va.huge_align_up();
        while chunk.as_usize() + HUGE_PAGE_SIZE <= end {
            if !self.pde(chunk).is_large() {
                self.promote_chunk(chunk)?;
            }
            chunk = chunk.add(HUGE_PAGE_SIZE);
        }
        Ok(())
    }

    /// Demote every whole 4 MiB chunk of `[va, va + len)` back to small
    /// mappings.
    ///
    /// The distance from `va` to the next 4 MiB boundary is subtracted
    /// from `len` before `va` is rounded up, so the unaligned leading
    /// remainder is excluded on both sides. Chunks already Small are a
    /// no-op, making the call idempotent.
    pub fn demote(&self, va: VirtAddr, len: usize) -> Result<(), VmOpError> {
        let start = va.huge_align_up();
        let len = len.saturating_sub(start.as_usize() - va.as_usize());
        let end = start.as_usize() + len;
        let mut chunk = start;
        while chunk.as_usize() + HUGE_PAGE_SIZE <= end {
            if self.pde(chunk).is_large() {
                self.demote_chunk(chunk)?;
            }
            chunk = chunk.add(HUGE_PAGE_SIZE);
        }
        Ok(())
    }

    /// Small -> Huge for one aligned chunk.
    fn promote_chunk(&self, chunk: VirtAddr) -> Result<(), VmOpError> {
        let huge = self
            .pool
            .alloc_huge_frame()
            .map_err(|_| VmOpError::AllocationFailed)?;

        if let Err(err) = self.copy_chunk_to_run(chunk, huge) {
            self.pool.free_huge_frame(huge);
            return Err(err);
        }
        if let Err(err) = self.teardown_small(chunk) {
            self.pool.free_huge_frame(huge);
            return Err(err);
        }

        self.set_pde(
            chunk,
            PageTableEntry::new(huge, PageFlags::USER_RW | PageFlags::LARGE),
        );
        self.machine().reload_page_dir(self.root());
        debug!("promote: {} -> {}", chunk, huge);
        Ok(())
    }

    /// Huge -> Small for one aligned chunk.
    fn demote_chunk(&self, chunk: VirtAddr) -> Result<(), VmOpError> {
        let huge = self.pde(chunk).addr();

        let table = self.pool.alloc_frame().ok_or(VmOpError::AllocationFailed)?;
        self.zero_frame(table);

        for i in 0..FRAMES_PER_HUGE {
            let frame = match self.pool.alloc_frame() {
                Some(frame) => frame,
                None => {
                    // Undo this chunk's partial allocations; the huge
                    // mapping is still intact.
                    for j in 0..i {
                        self.pool.free_frame(self.entry(table, j).addr());
                    }
                    self.pool.free_frame(table);
                    return Err(VmOpError::AllocationFailed);
                }
            };
            self.copy_frame(huge.add(i * PAGE_SIZE), frame);
            self.set_entry(table, i, PageTableEntry::new(frame, PageFlags::USER_RW));
        }

        self.pool.free_huge_frame(huge);
        self.set_pde(chunk, PageTableEntry::new(table, PageFlags::USER_RW));
        self.machine().reload_page_dir(self.root());
        debug!("demote: {} -> table {}", chunk, table);
        Ok(())
    }

    /// Copy a Small chunk's 1024 frames into a freshly allocated run.
    fn copy_chunk_to_run(&self, chunk: VirtAddr, huge: PhysAddr) -> Result<(), VmOpError> {
        let pde = self.pde(chunk);
        if !pde.is_present() || pde.is_large() {
            return Err(VmOpError::CopyFailed);
        }
        let table = pde.addr();
        for i in 0..FRAMES_PER_HUGE {
            let pte = self.entry(table, i);
            if !pte.is_present() {
                return Err(VmOpError::CopyFailed);
            }
            self.copy_frame(pte.addr(), huge.add(i * PAGE_SIZE));
        }
        Ok(())
    }

    /// Release a Small chunk's page table and its 1024 frames.
    fn teardown_small(&self, chunk: VirtAddr) -> Result<(), VmOpError> {
        let pde = self.pde(chunk);
        if !pde.is_present() || pde.is_large() {
            return Err(VmOpError::TeardownFailed);
        }
        let table = pde.addr();
        for i in 0..FRAMES_PER_HUGE {
            let pte = self.entry(table, i);
            if pte.is_present() {
                self.pool.free_frame(pte.addr());
            }
        }
        self.pool.free_frame(table);
        self.set_pde(chunk, PageTableEntry::absent());
        Ok(())
    }
}
