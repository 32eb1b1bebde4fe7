//! Translation Queries
//!
//! Read-only lookups over an address space, consumed by the syscall
//! boundary: physical-address translation, huge-mapping detection, and
//! huge-chunk counting. None of these mutate mappings or touch the
//! frame pool.

use super::address::{PhysAddr, VirtAddr, HUGE_PAGE_SIZE};
use super::hal::Machine;
use super::space::AddressSpace;

impl<'m, 'p, M: Machine> AddressSpace<'m, 'p, M> {
    /// Translate `va` to its physical address, or `None` if unmapped.
    ///
    /// Under a huge mapping the low 22 bits of `va` pass through; under
    /// a small mapping the page table supplies the frame and the low
    /// 12 bits pass through.
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        let pde = self.pde(va);
        if !pde.is_present() {
            return None;
        }
        if pde.is_large() {
            return Some(pde.addr().add(va.huge_offset()));
        }
        let pte = self.entry(pde.addr(), va.table_index());
        if !pte.is_present() {
            return None;
        }
        Some(pte.addr().add(va.page_offset()))
    }

    /// Whether `va` is covered by a huge mapping.
    pub fn is_huge(&self, va: VirtAddr) -> bool {
        self.pde(va).is_large()
    }

    /// Number of 4 MiB-aligned chunks fully inside `[va, va + len)`
    /// whose directory entry carries the large-page bit.
    pub fn count_huge_chunks(&self, va: VirtAddr, len: usize) -> usize {
        let end = va.as_usize() + len;
        let mut count = 0;
        let mut chunk = va.huge_align_up();
        while chunk.as_usize() + HUGE_PAGE_SIZE <= end {
            if self.pde(chunk).is_large() {
                count += 1;
            }
            chunk = chunk.add(HUGE_PAGE_SIZE);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::address::PAGE_SIZE;
    use crate::mm::paging::{PageFlags, PageTableEntry};
    use crate::mm::pool::FramePool;
    use crate::mm::sim::SimMachine;

    const BASE: usize = 0x0040_0000;
    const VA: usize = 0x0800_0000;
    const MIB: usize = 1024 * 1024;

    fn full_pool(bytes: usize) -> FramePool<'static, SimMachine> {
        let m: &'static SimMachine =
            Box::leak(Box::new(SimMachine::new(PhysAddr::new(BASE), bytes)));
        let pool = FramePool::new(m, m.base(), m.top());
        let mid = m.base().add(bytes / 2 / PAGE_SIZE * PAGE_SIZE);
        pool.init_phase1(m.base()..mid);
        pool.init_phase2(mid..m.top());
        pool
    }

    #[test]
    fn test_translate_small_vs_huge_masks() {
        let pool = full_pool(2 * HUGE_PAGE_SIZE + 64 * PAGE_SIZE);
        let space = AddressSpace::new(&pool).unwrap();
        let va = VirtAddr::new(VA);

        space.map_range(va, 2 * PAGE_SIZE, PageFlags::USER_RW).unwrap();
        let small = space.translate(va.add(PAGE_SIZE + 0x7ff)).unwrap();
        // Small: only the low 12 bits come from the virtual address.
        assert_eq!(small.as_usize() & 0xfff, 0x7ff);

        let hva = VirtAddr::new(VA + 4 * MIB);
        let run = pool.alloc_huge_frame().unwrap();
        space.set_pde(
            hva,
            PageTableEntry::new(run, PageFlags::USER_RW | PageFlags::LARGE),
        );
        // Huge: the low 22 bits pass through to the run base.
        let offset = 3 * MIB + 0x123;
        assert_eq!(space.translate(hva.add(offset)), Some(run.add(offset)));
    }

    #[test]
    fn test_translate_unmapped() {
        let pool = full_pool(64 * PAGE_SIZE);
        let space = AddressSpace::new(&pool).unwrap();
        let va = VirtAddr::new(VA);
        assert_eq!(space.translate(va), None);

        // Present directory entry, absent table entry.
        space.map_range(va, PAGE_SIZE, PageFlags::USER_RW).unwrap();
        assert_eq!(space.translate(va.add(PAGE_SIZE)), None);
    }

    #[test]
    fn test_is_huge_tracks_pde() {
        let pool = full_pool(HUGE_PAGE_SIZE + 64 * PAGE_SIZE);
        let space = AddressSpace::new(&pool).unwrap();
        let va = VirtAddr::new(VA);
        assert!(!space.is_huge(va));

        space.map_range(va, PAGE_SIZE, PageFlags::USER_RW).unwrap();
        assert!(!space.is_huge(va));

        let hva = VirtAddr::new(VA + 4 * MIB);
        let run = pool.alloc_huge_frame().unwrap();
        space.set_pde(
            hva,
            PageTableEntry::new(run, PageFlags::USER_RW | PageFlags::LARGE),
        );
        assert!(space.is_huge(hva));
        // Any address inside the chunk reports huge.
        assert!(space.is_huge(hva.add(3 * MIB)));
    }

    #[test]
    fn test_count_huge_chunks_window() {
        let pool = full_pool(2 * HUGE_PAGE_SIZE + 64 * PAGE_SIZE);
        let space = AddressSpace::new(&pool).unwrap();
        let va = VirtAddr::new(VA);

        for i in 0..2 {
            let run = pool.alloc_huge_frame().unwrap();
            space.set_pde(
                va.add(i * 4 * MIB),
                PageTableEntry::new(run, PageFlags::USER_RW | PageFlags::LARGE),
            );
        }

        assert_eq!(space.count_huge_chunks(va, 8 * MIB), 2);
        // Windows that only partially cover a chunk exclude it.
        assert_eq!(space.count_huge_chunks(va, 8 * MIB - 1), 1);
        assert_eq!(space.count_huge_chunks(va.add(1), 8 * MIB - 1), 1);
        assert_eq!(space.count_huge_chunks(va, 4 * MIB), 1);
        assert_eq!(space.count_huge_chunks(va, 4 * MIB - 1), 0);
        assert_eq!(space.count_huge_chunks(va, 0), 0);
    }
}
