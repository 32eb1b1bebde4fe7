//! Address Spaces
//!
//! One `AddressSpace` per process: a page-directory frame plus the
//! page tables hanging off it, all allocated from the frame pool and
//! reached only through the machine seam. Provides the walker used to
//! build Small mappings and byte-level copies through the live mapping.
//!
//! Mutation of an address space is not synchronized here; the process
//! layer guarantees a single mutator per address space (the pool remains
//! the only cross-core shared state).

use log::trace;

use super::address::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, PAGE_MASK, PAGE_SIZE};
use super::hal::Machine;
use super::paging::{MappingError, PageFlags, PageTable, PageTableEntry};
use super::pool::FramePool;

/// A process address space: a page directory and its tables.
pub struct AddressSpace<'m, 'p, M: Machine> {
    pub(super) pool: &'p FramePool<'m, M>,
    root: PhysAddr,
}

impl<'m, 'p, M: Machine> AddressSpace<'m, 'p, M> {
    /// Create an empty address space with a zeroed page directory.
    pub fn new(pool: &'p FramePool<'m, M>) -> Result<Self, MappingError> {
        let root = pool.alloc_frame().ok_or(MappingError::OutOfMemory)?;
        let space = Self { pool, root };
        space.zero_frame(root);
        Ok(space)
    }

    /// Physical address of the page directory.
    #[inline]
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    #[inline]
    pub(super) fn machine(&self) -> &'m M {
        self.pool.machine()
    }

    /// Read an entry out of the directory or table frame at `table`.
    pub(super) fn entry(&self, table: PhysAddr, index: usize) -> PageTableEntry {
        debug_assert!(table.is_aligned() && index < ENTRIES_PER_TABLE);
        // SAFETY: `table` is a live directory/table frame owned by this
        // address space, correctly aligned for a PageTable view.
        let view = unsafe { &*(self.machine().frame_ptr(table) as *const PageTable) };
        view[index]
    }

    /// Write an entry into the directory or table frame at `table`.
    pub(super) fn set_entry(&self, table: PhysAddr, index: usize, entry: PageTableEntry) {
        debug_assert!(table.is_aligned() && index < ENTRIES_PER_TABLE);
        // SAFETY: as in `entry`; the process layer serializes mutation.
        let view = unsafe { &mut *(self.machine().frame_ptr(table) as *mut PageTable) };
        view[index] = entry;
    }

    /// The directory entry covering `va`.
    #[inline]
    pub(super) fn pde(&self, va: VirtAddr) -> PageTableEntry {
        self.entry(self.root, va.dir_index())
    }

    #[inline]
    pub(super) fn set_pde(&self, va: VirtAddr, entry: PageTableEntry) {
        self.set_entry(self.root, va.dir_index(), entry);
    }

    pub(super) fn zero_frame(&self, frame: PhysAddr) {
        // SAFETY: the frame is owned by this address space.
        unsafe {
            core::ptr::write_bytes(self.machine().frame_ptr(frame), 0, PAGE_SIZE);
        }
    }

    /// Copy one whole frame.
    pub(super) fn copy_frame(&self, src: PhysAddr, dst: PhysAddr) {
        // SAFETY: both frames are distinct, owned, and PAGE_SIZE long.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.machine().frame_ptr(src),
                self.machine().frame_ptr(dst),
                PAGE_SIZE,
            );
        }
    }

    /// Find the page table covering `va`, allocating it if `create`.
    ///
    /// Fails with `AlreadyMapped` if `va` is covered by a huge mapping
    /// (there is no table to walk into) and `OutOfMemory` if a table
    /// frame cannot be allocated.
    fn walk_table(&self, va: VirtAddr, create: bool) -> Result<PhysAddr, MappingError> {
        let pde = self.pde(va);
        if pde.is_large() {
            return Err(MappingError::AlreadyMapped);
        }
        if pde.is_present() {
            return Ok(pde.addr());
        }
        if !create {
            return Err(MappingError::NotMapped);
        }
        let table = self.pool.alloc_frame().ok_or(MappingError::OutOfMemory)?;
        self.zero_frame(table);
        self.set_pde(va, PageTableEntry::new(table, PageFlags::USER_RW));
        Ok(table)
    }

    /// Map `len` bytes starting at `va`, backed by freshly allocated,
    /// zeroed frames.
    ///
    /// `va` must be frame-aligned; `len` is rounded up to whole frames.
    /// Fails if any page in the range is already mapped. A failure
    /// partway leaves the earlier pages mapped.
    pub fn map_range(&self, va: VirtAddr, len: usize, flags: PageFlags) -> Result<(), MappingError> {
        if !va.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        let mut page = va;
        let end = va.as_usize() + len;
        while page.as_usize() < end {
            let table = self.walk_table(page, true)?;
            if self.entry(table, page.table_index()).is_present() {
                return Err(MappingError::AlreadyMapped);
            }
            let frame = self.pool.alloc_frame().ok_or(MappingError::OutOfMemory)?;
            self.zero_frame(frame);
            self.set_entry(
                table,
                page.table_index(),
                PageTableEntry::new(frame, flags | PageFlags::PRESENT),
            );
            page = page.add(PAGE_SIZE);
        }
        trace!("map_range: {} + {:#x}", va, len);
        Ok(())
    }

    /// Copy `buf` into the address space at `va` through the current
    /// mapping (small or huge).
    pub fn write(&self, va: VirtAddr, buf: &[u8]) -> Result<(), MappingError> {
        self.for_each_span(va, buf.len(), |space, pa, offset, chunk| {
            // SAFETY: `pa` stays inside one frame for `chunk` bytes.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    buf.as_ptr().add(offset),
                    space.machine().frame_ptr(pa),
                    chunk,
                );
            }
        })
    }

    /// Copy bytes out of the address space at `va` into `buf`.
    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), MappingError> {
        let dst = buf.as_mut_ptr();
        self.for_each_span(va, buf.len(), |space, pa, offset, chunk| {
            // SAFETY: as in `write`; `buf` is exclusively ours.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    space.machine().frame_ptr(pa),
                    dst.add(offset),
                    chunk,
                );
            }
        })
    }

    /// Drive `op` over the frame-bounded spans of `[va, va + len)`.
    fn for_each_span(
        &self,
        va: VirtAddr,
        len: usize,
        mut op: impl FnMut(&Self, PhysAddr, usize, usize),
    ) -> Result<(), MappingError> {
        let mut offset = 0;
        while offset < len {
            let cursor = va.add(offset);
            let pa = self.translate(cursor).ok_or(MappingError::NotMapped)?;
            let chunk = (len - offset).min(PAGE_SIZE - (cursor.as_usize() & PAGE_MASK));
            op(self, pa, offset, chunk);
            offset += chunk;
        }
        Ok(())
    }
}
