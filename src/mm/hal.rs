//! Hardware Seam
//!
//! The one interface through which the memory core touches the machine:
//! dereferencing physical frames and poking translation hardware. The
//! real kernel implements this with the direct map and CR-register
//! writes; [`sim`](super::sim) implements it over a byte arena so the
//! allocator and promotion logic run in host tests.

use super::address::PhysAddr;

/// Access to physical memory and the translation hardware.
///
/// Implementations must hand out pointers that remain valid for the
/// lifetime of the machine; the core performs all frame reads and writes
/// through them.
pub trait Machine {
    /// Get a writable pointer to the byte of physical memory at `addr`.
    ///
    /// `addr` must lie inside installed physical memory. The returned
    /// pointer is valid through the end of the containing frame.
    fn frame_ptr(&self, addr: PhysAddr) -> *mut u8;

    /// Reload the page-directory base register with `root`.
    ///
    /// This invalidates the translation cache on the executing core.
    /// Other cores are not flushed; the kernel assumes a process's
    /// mappings are only observed by the core currently running it.
    fn reload_page_dir(&self, root: PhysAddr);

    /// Enable large-page translation (the CR4.PSE equivalent).
    ///
    /// Idempotent; called before any huge mapping is installed.
    fn enable_large_pages(&self);
}
