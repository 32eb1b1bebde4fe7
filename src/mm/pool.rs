//! Physical Frame Pool
//!
//! Process-wide free list of 4 KiB frames, guarded by a single spinlock.
//!
//! # Bootstrap
//! Initialization happens in two phases, mirroring how the kernel comes
//! up:
//! 1. `init_phase1` registers the range covered by the boot page table,
//!    while only one core is running.
//! 2. `init_phase2` registers the remaining physical memory once a
//!    complete page table is active on every core. Called exactly once.
//!
//! The lifecycle is an explicit state machine
//! (`Uninitialized -> SingleCoreBootstrap -> MultiCoreActive`); ordering
//! violations are kernel bugs and halt immediately.
//!
//! # Bookkeeping
//! The free list is LIFO and singly linked, but the links live in a
//! per-frame slot table rather than inside the freed frames themselves,
//! so bookkeeping never aliases the data region. Traversal order is
//! identical to an intrusive list: the head is the most recently freed
//! frame and each slot records the index of the next free frame.
//!
//! # Fatal frees
//! A free of a misaligned address, an address outside the managed range,
//! or a frame not currently allocated indicates corruption in the caller
//! and halts the kernel. Freed frames are filled with a junk byte to
//! surface use-after-free.

use core::ops::Range;

use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use spin::Mutex;

use super::address::{PhysAddr, PAGE_SIZE};
use super::hal::Machine;

/// Byte written over every freed frame to catch dangling references.
pub const JUNK_BYTE: u8 = 0x01;

/// Lifecycle of the frame pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PoolState {
    /// No memory registered yet.
    Uninitialized,
    /// Phase 1 done; single core, boot page table.
    SingleCoreBootstrap,
    /// Phase 2 done; all cores share the pool.
    MultiCoreActive,
}

/// Per-frame bookkeeping state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Slot {
    /// Inside the managed span but never registered (hole between the
    /// phase-1 and phase-2 ranges, or not yet reached).
    Unmanaged,
    /// On the free list; `next` indexes the next free frame.
    Free { next: Option<u32> },
    /// Owned by a caller, a page table, or a huge mapping.
    Allocated,
}

pub(super) struct PoolInner {
    pub(super) state: PoolState,
    /// Index of the most recently freed frame.
    pub(super) head: Option<u32>,
    /// One slot per frame in `[base, top)`.
    pub(super) slots: Vec<Slot>,
    /// First managed address: the kernel image end, frame-aligned up.
    pub(super) base: PhysAddr,
    /// Top of installed physical memory.
    pub(super) top: PhysAddr,
}

impl PoolInner {
    #[inline]
    pub(super) fn index_of(&self, addr: PhysAddr) -> u32 {
        ((addr.as_usize() - self.base.as_usize()) / PAGE_SIZE) as u32
    }

    #[inline]
    pub(super) fn addr_of(&self, index: u32) -> PhysAddr {
        self.base.add(index as usize * PAGE_SIZE)
    }

    #[inline]
    pub(super) fn next_of(&self, index: u32) -> Option<u32> {
        match self.slots[index as usize] {
            Slot::Free { next } => next,
            _ => panic!("frame pool: free-list link through non-free slot"),
        }
    }

    fn push(&mut self, index: u32) {
        self.slots[index as usize] = Slot::Free { next: self.head };
        self.head = Some(index);
    }

    fn pop(&mut self) -> Option<u32> {
        let index = self.head?;
        self.head = self.next_of(index);
        self.slots[index as usize] = Slot::Allocated;
        Some(index)
    }
}

/// The frame pool: every free 4 KiB frame of physical memory.
///
/// The single `Mutex` is the only cross-core synchronization in the
/// memory core; every operation holds it for its full critical section.
pub struct FramePool<'m, M: Machine> {
    mem: &'m M,
    pub(super) inner: Mutex<PoolInner>,
}

impl<'m, M: Machine> FramePool<'m, M> {
    /// Create an empty pool managing frames in `[kernel_end, phys_top)`.
    ///
    /// `kernel_end` is rounded up to a frame boundary. No frames are
    /// usable until `init_phase1` runs.
    pub fn new(mem: &'m M, kernel_end: PhysAddr, phys_top: PhysAddr) -> Self {
        let base = kernel_end.align_up();
        assert!(phys_top.is_aligned() && base < phys_top);
        let frames = (phys_top.as_usize() - base.as_usize()) / PAGE_SIZE;
        Self {
            mem,
            inner: Mutex::new(PoolInner {
                state: PoolState::Uninitialized,
                head: None,
                slots: vec![Slot::Unmanaged; frames],
                base,
                top: phys_top,
            }),
        }
    }

    /// The machine this pool's frames belong to.
    #[inline]
    pub fn machine(&self) -> &'m M {
        self.mem
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.inner.lock().state
    }

    /// Register the boot-time range onto the free list.
    ///
    /// Only one core is running at this point; the lock is uncontended.
    ///
    /// # Panics
    /// Panics if the pool is not `Uninitialized`.
    pub fn init_phase1(&self, range: Range<PhysAddr>) {
        let mut inner = self.inner.lock();
        if inner.state != PoolState::Uninitialized {
            panic!("frame pool: init_phase1 called twice");
        }
        let registered = self.free_range(&mut inner, range);
        inner.state = PoolState::SingleCoreBootstrap;
        debug!("frame pool phase 1: {} frames registered", registered);
    }

    /// Register the remaining physical memory and go multi-core.
    ///
    /// Must be called exactly once, after `init_phase1`, after a complete
    /// page table is active on every core.
    ///
    /// # Panics
    /// Panics if called before phase 1 or more than once.
    pub fn init_phase2(&self, range: Range<PhysAddr>) {
        let mut inner = self.inner.lock();
        if inner.state != PoolState::SingleCoreBootstrap {
            panic!("frame pool: init_phase2 out of sequence");
        }
        let registered = self.free_range(&mut inner, range);
        inner.state = PoolState::MultiCoreActive;
        debug!("frame pool phase 2: {} frames registered", registered);
    }

    /// Put every whole frame of `range` onto the free list.
    fn free_range(&self, inner: &mut PoolInner, range: Range<PhysAddr>) -> usize {
        let mut registered = 0;
        let mut frame = range.start.align_up();
        while frame.add(PAGE_SIZE) <= range.end {
            self.check_bounds(inner, frame);
            let index = inner.index_of(frame);
            if inner.slots[index as usize] != Slot::Unmanaged {
                panic!("frame pool: range registered twice at {}", frame);
            }
            self.fill_junk(frame);
            inner.push(index);
            registered += 1;
            frame = frame.add(PAGE_SIZE);
        }
        registered
    }

    /// Allocate one 4 KiB frame.
    ///
    /// Returns `None` if the pool is empty. This is an ordinary,
    /// recoverable condition; callers surface it as an allocation
    /// failure, never as a crash.
    ///
    /// The frame's contents are whatever the previous owner (or the junk
    /// fill) left there; callers that need zeroed memory clear it.
    pub fn alloc_frame(&self) -> Option<PhysAddr> {
        let mut inner = self.inner.lock();
        let index = inner.pop()?;
        Some(inner.addr_of(index))
    }

    /// Return a frame to the pool.
    ///
    /// # Panics
    /// Halts the kernel if `addr` is misaligned, lies below the kernel
    /// image end, lies at or above the top of physical memory, or is not
    /// currently allocated (double free). All of these indicate a prior
    /// bug in the caller and are unrecoverable.
    pub fn free_frame(&self, addr: PhysAddr) {
        let mut inner = self.inner.lock();
        self.check_bounds(&inner, addr);
        let index = inner.index_of(addr);
        match inner.slots[index as usize] {
            Slot::Allocated => {}
            Slot::Free { .. } => panic!("free_frame: double free of {}", addr),
            Slot::Unmanaged => panic!("free_frame: {} was never allocated", addr),
        }
        self.fill_junk(addr);
        inner.push(index);
    }

    /// Number of frames currently free.
    ///
    /// Walks the whole list under the lock; O(n), diagnostics only.
    pub fn free_frame_count(&self) -> usize {
        let inner = self.inner.lock();
        let mut count = 0;
        let mut cursor = inner.head;
        while let Some(index) = cursor {
            count += 1;
            cursor = inner.next_of(index);
        }
        count
    }

    fn check_bounds(&self, inner: &PoolInner, addr: PhysAddr) {
        if !addr.is_aligned() || addr < inner.base || addr >= inner.top {
            panic!("free_frame: corrupt address {}", addr);
        }
    }

    fn fill_junk(&self, frame: PhysAddr) {
        // SAFETY: bounds were checked; the frame is owned by the pool
        // for the duration of the fill.
        unsafe {
            core::ptr::write_bytes(self.mem.frame_ptr(frame), JUNK_BYTE, PAGE_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::sim::SimMachine;

    const BASE: usize = 0x0040_0000;

    fn machine(frames: usize) -> &'static SimMachine {
        Box::leak(Box::new(SimMachine::new(
            PhysAddr::new(BASE),
            frames * PAGE_SIZE,
        )))
    }

    fn full_pool(frames: usize) -> FramePool<'static, SimMachine> {
        let m = machine(frames);
        let pool = FramePool::new(m, m.base(), m.top());
        let mid = m.base().add(frames / 2 * PAGE_SIZE);
        pool.init_phase1(m.base()..mid);
        pool.init_phase2(mid..m.top());
        pool
    }

    #[test]
    fn test_two_phase_registration() {
        let m = machine(16);
        let pool = FramePool::new(m, m.base(), m.top());
        assert_eq!(pool.state(), PoolState::Uninitialized);
        assert_eq!(pool.alloc_frame(), None);

        let mid = m.base().add(8 * PAGE_SIZE);
        pool.init_phase1(m.base()..mid);
        assert_eq!(pool.state(), PoolState::SingleCoreBootstrap);
        assert_eq!(pool.free_frame_count(), 8);

        pool.init_phase2(mid..m.top());
        assert_eq!(pool.state(), PoolState::MultiCoreActive);
        assert_eq!(pool.free_frame_count(), 16);
    }

    #[test]
    fn test_partial_trailing_frame_ignored() {
        let m = machine(4);
        let pool = FramePool::new(m, m.base(), m.top());
        // Range ends mid-frame: the trailing partial frame is skipped.
        pool.init_phase1(m.base()..m.top().sub(PAGE_SIZE / 2));
        assert_eq!(pool.free_frame_count(), 3);
    }

    #[test]
    fn test_lifo_order() {
        let pool = full_pool(8);
        let frame = pool.alloc_frame().unwrap();
        pool.free_frame(frame);
        assert_eq!(pool.alloc_frame(), Some(frame));
    }

    #[test]
    fn test_exhaustion_is_not_fatal() {
        let pool = full_pool(4);
        for _ in 0..4 {
            assert!(pool.alloc_frame().is_some());
        }
        assert_eq!(pool.alloc_frame(), None);
        assert_eq!(pool.free_frame_count(), 0);
    }

    #[test]
    fn test_freed_frame_is_junk_filled() {
        let pool = full_pool(4);
        let frame = pool.alloc_frame().unwrap();
        let ptr = pool.machine().frame_ptr(frame);
        unsafe { core::ptr::write_bytes(ptr, 0xee, PAGE_SIZE) };
        pool.free_frame(frame);
        assert_eq!(pool.machine().read_byte(frame), JUNK_BYTE);
        assert_eq!(pool.machine().read_byte(frame.add(PAGE_SIZE - 1)), JUNK_BYTE);
    }

    #[test]
    fn test_alloc_returns_distinct_frames() {
        let pool = full_pool(8);
        let a = pool.alloc_frame().unwrap();
        let b = pool.alloc_frame().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.free_frame_count(), 6);
    }

    #[test]
    #[should_panic(expected = "corrupt address")]
    fn test_misaligned_free_is_fatal() {
        let pool = full_pool(4);
        let frame = pool.alloc_frame().unwrap();
        pool.free_frame(frame.add(0x10));
    }

    #[test]
    #[should_panic(expected = "corrupt address")]
    fn test_below_kernel_end_free_is_fatal() {
        let pool = full_pool(4);
        pool.free_frame(PhysAddr::new(BASE - PAGE_SIZE));
    }

    #[test]
    #[should_panic(expected = "corrupt address")]
    fn test_above_phys_top_free_is_fatal() {
        let pool = full_pool(4);
        pool.free_frame(PhysAddr::new(BASE + 4 * PAGE_SIZE));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let pool = full_pool(4);
        let frame = pool.alloc_frame().unwrap();
        pool.free_frame(frame);
        pool.free_frame(frame);
    }

    #[test]
    #[should_panic(expected = "out of sequence")]
    fn test_phase2_before_phase1_is_fatal() {
        let m = machine(4);
        let pool = FramePool::new(m, m.base(), m.top());
        pool.init_phase2(m.base()..m.top());
    }

    #[test]
    #[should_panic(expected = "out of sequence")]
    fn test_phase2_twice_is_fatal() {
        let m = machine(4);
        let pool = FramePool::new(m, m.base(), m.top());
        let mid = m.base().add(2 * PAGE_SIZE);
        pool.init_phase1(m.base()..mid);
        pool.init_phase2(mid..m.top());
        pool.init_phase2(mid..m.top());
    }

    #[test]
    #[should_panic(expected = "called twice")]
    fn test_phase1_twice_is_fatal() {
        let m = machine(4);
        let pool = FramePool::new(m, m.base(), m.top());
        pool.init_phase1(m.base()..m.top());
        pool.init_phase1(m.base()..m.top());
    }
}
