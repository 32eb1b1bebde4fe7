//! Huge Frame Allocation
//!
//! Locates and allocates physically contiguous, 4 MiB-aligned runs of
//! 1024 frames inside the frame pool's free list. There is no separate
//! huge pool: a huge frame exists only transiently as a located run and,
//! once handed out, is tracked solely by the directory entry that maps
//! it.
//!
//! # Run qualification
//! A candidate `S` starts a run when:
//! 1. `S`'s end address (`S` + 4 KiB) is 4 MiB-aligned - the run's
//!    *last* frame lands exactly on the boundary, and
//! 2. following the free-list links from `S`, each successive frame sits
//!    exactly one frame below the previous one, for 1023 steps.
//!
//! Because a fresh pool is registered in ascending address order, the
//! LIFO list naturally descends and a whole free region qualifies.
//!
//! The scan holds the pool lock end to end, so concurrent frame
//! operations on other cores block for its duration - an accepted
//! latency cost at the pool sizes this kernel targets. A failed probe
//! resumes at its stopping node, keeping the whole scan O(n).

use core::fmt;

use log::{debug, trace};

use super::address::{PhysAddr, FRAMES_PER_HUGE, PAGE_SIZE};
use super::hal::Machine;
use super::pool::{FramePool, Slot};

/// No contiguous, aligned 1024-frame run exists.
///
/// An ordinary recoverable condition, on par with small-frame
/// exhaustion; the free list is left untouched and the caller decides
/// what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no contiguous 4 MiB run of free frames")
    }
}

impl<'m, M: Machine> FramePool<'m, M> {
    /// Allocate one 4 MiB huge frame.
    ///
    /// Scans the free list once under the pool lock. On success the
    /// entire run is spliced out in one link update, zero-filled, and
    /// its (4 MiB-aligned) base address returned.
    pub fn alloc_huge_frame(&self) -> Result<PhysAddr, Exhausted> {
        let mut inner = self.inner.lock();
        let mut prev: Option<u32> = None;
        let mut cursor = inner.head;

        while let Some(start) = cursor {
            if !inner.addr_of(start).add(PAGE_SIZE).is_huge_aligned() {
                prev = Some(start);
                cursor = inner.next_of(start);
                continue;
            }

            // Probe: walk 1023 links, each exactly one frame below the
            // previous.
            let mut last = start;
            let mut steps = 0;
            while steps < FRAMES_PER_HUGE - 1 {
                match inner.next_of(last) {
                    Some(next) if next + 1 == last => {
                        last = next;
                        steps += 1;
                    }
                    _ => break,
                }
            }

            if steps == FRAMES_PER_HUGE - 1 {
                // `last` is the run's base; splice the whole run out by
                // patching the predecessor past it.
                let base = inner.addr_of(last);
                let after = inner.next_of(last);
                match prev {
                    Some(p) => inner.slots[p as usize] = Slot::Free { next: after },
                    None => inner.head = after,
                }
                for i in 0..FRAMES_PER_HUGE as u32 {
                    inner.slots[(last + i) as usize] = Slot::Allocated;
                }
                drop(inner);

                self.zero_run(base);
                trace!("alloc_huge_frame: run at {}", base);
                return Ok(base);
            }

            // No aligned end can occur inside the probed descending
            // chain, so resume past it.
            prev = Some(last);
            cursor = inner.next_of(last);
        }

        debug!("alloc_huge_frame: exhausted");
        Err(Exhausted)
    }

    /// Return a huge frame to the pool.
    ///
    /// Performs 1024 ordinary frame frees starting at `base`; the usual
    /// fatal-free checks apply to each constituent frame.
    ///
    /// # Panics
    /// Halts the kernel if `base` is not 4 MiB-aligned.
    pub fn free_huge_frame(&self, base: PhysAddr) {
        if !base.is_huge_aligned() {
            panic!("free_huge_frame: corrupt base {}", base);
        }
        for i in 0..FRAMES_PER_HUGE {
            self.free_frame(base.add(i * PAGE_SIZE));
        }
    }

    fn zero_run(&self, base: PhysAddr) {
        for i in 0..FRAMES_PER_HUGE {
            let frame = base.add(i * PAGE_SIZE);
            // SAFETY: the run was just spliced out of the free list and
            // is exclusively ours.
            unsafe {
                core::ptr::write_bytes(self.machine().frame_ptr(frame), 0, PAGE_SIZE);
            }
        }
    }
}
