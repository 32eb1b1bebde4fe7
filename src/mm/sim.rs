//! Simulated Machine
//!
//! A [`Machine`] backed by a plain byte arena standing in for installed
//! physical memory, plus counters recording translation-hardware
//! traffic. This is what makes the frame pool, run locator, and
//! promotion engine testable without real paging hardware.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloc::boxed::Box;
use alloc::vec;

use super::address::{PhysAddr, PAGE_SIZE};
use super::hal::Machine;

/// One frame of arena storage, aligned so frame-aligned physical
/// addresses map to pointers valid for `PageTable` views.
#[repr(C, align(4096))]
#[derive(Clone, Copy)]
struct ArenaFrame([u8; PAGE_SIZE]);

/// An in-memory machine: `size` bytes of "physical" memory starting at
/// `base`, with no translation hardware beyond a reload counter.
pub struct SimMachine {
    ram: UnsafeCell<Box<[ArenaFrame]>>,
    base: PhysAddr,
    size: usize,
    page_dir_reloads: AtomicUsize,
    large_pages: AtomicBool,
}

// The arena is only mutated through raw pointers handed out by
// `frame_ptr`; callers own the frames they touch, mirroring real
// physical memory.
unsafe impl Sync for SimMachine {}

impl SimMachine {
    /// Create a machine with `size` bytes of physical memory at `base`.
    ///
    /// # Panics
    /// Panics if `base` or `size` is not frame-aligned.
    pub fn new(base: PhysAddr, size: usize) -> Self {
        assert!(base.is_aligned() && size % PAGE_SIZE == 0);
        Self {
            ram: UnsafeCell::new(
                vec![ArenaFrame([0u8; PAGE_SIZE]); size / PAGE_SIZE].into_boxed_slice(),
            ),
            base,
            size,
            page_dir_reloads: AtomicUsize::new(0),
            large_pages: AtomicBool::new(false),
        }
    }

    /// Lowest physical address of the arena.
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// One past the highest physical address of the arena.
    pub fn top(&self) -> PhysAddr {
        self.base.add(self.size)
    }

    /// How many times the page-directory base register was reloaded.
    pub fn page_dir_reloads(&self) -> usize {
        self.page_dir_reloads.load(Ordering::Relaxed)
    }

    /// Whether large-page translation has been enabled.
    pub fn large_pages_enabled(&self) -> bool {
        self.large_pages.load(Ordering::Relaxed)
    }

    /// Read one byte of physical memory (test convenience).
    pub fn read_byte(&self, addr: PhysAddr) -> u8 {
        // SAFETY: frame_ptr bounds-checks the address; single byte read.
        unsafe { *self.frame_ptr(addr) }
    }
}

impl Machine for SimMachine {
    fn frame_ptr(&self, addr: PhysAddr) -> *mut u8 {
        let offset = addr
            .as_usize()
            .checked_sub(self.base.as_usize())
            .expect("physical address below arena");
        assert!(offset < self.size, "physical address above arena");
        // SAFETY: offset is in bounds; the box is never reallocated.
        unsafe { ((*self.ram.get()).as_mut_ptr() as *mut u8).add(offset) }
    }

    fn reload_page_dir(&self, _root: PhysAddr) {
        self.page_dir_reloads.fetch_add(1, Ordering::Relaxed);
    }

    fn enable_large_pages(&self) {
        self.large_pages.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ptr_offsets() {
        let m = SimMachine::new(PhysAddr::new(0x0040_0000), 8 * PAGE_SIZE);
        let a = m.frame_ptr(PhysAddr::new(0x0040_0000));
        let b = m.frame_ptr(PhysAddr::new(0x0040_1000));
        assert_eq!(unsafe { b.offset_from(a) }, PAGE_SIZE as isize);
    }

    #[test]
    fn test_counters() {
        let m = SimMachine::new(PhysAddr::new(0x0040_0000), PAGE_SIZE);
        assert_eq!(m.page_dir_reloads(), 0);
        m.reload_page_dir(PhysAddr::new(0x0040_0000));
        m.reload_page_dir(PhysAddr::new(0x0040_0000));
        assert_eq!(m.page_dir_reloads(), 2);
        assert!(!m.large_pages_enabled());
        m.enable_large_pages();
        assert!(m.large_pages_enabled());
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_access() {
        let m = SimMachine::new(PhysAddr::new(0x0040_0000), PAGE_SIZE);
        m.frame_ptr(PhysAddr::new(0x0040_1000));
    }
}
