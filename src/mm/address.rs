//! Physical and Virtual Address Types
//!
//! Type-safe wrappers for memory addresses that prevent mixing
//! physical and virtual addresses at compile time.
//!
//! The paging geometry is the classic two-level 32-bit layout: a virtual
//! address splits into a 10-bit directory index, a 10-bit table index,
//! and a 12-bit page offset. With the large-page bit set, a directory
//! entry maps the whole 4 MiB covered by its slot and the low 22 bits of
//! the virtual address pass through untranslated.

use core::fmt;

/// Frame size (4 KiB).
pub const PAGE_SIZE: usize = 4096;
/// Frame size mask.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for a frame number.
pub const PAGE_SHIFT: usize = 12;

/// Frames per huge unit.
pub const FRAMES_PER_HUGE: usize = 1024;
/// Huge page size (4 MiB): one directory slot's coverage.
pub const HUGE_PAGE_SIZE: usize = FRAMES_PER_HUGE * PAGE_SIZE;
/// Huge page mask.
pub const HUGE_PAGE_MASK: usize = HUGE_PAGE_SIZE - 1;
/// Bits to shift for a huge-page number.
pub const HUGE_PAGE_SHIFT: usize = 22;

/// Number of entries per page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// A physical memory address.
///
/// This is a newtype wrapper that prevents accidental mixing of
/// physical and virtual addresses. Physical addresses are never
/// dereferenced directly; all access goes through
/// [`Machine::frame_ptr`](super::hal::Machine::frame_ptr).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// Create a new physical address.
    ///
    /// # Panics
    /// Panics in debug mode if the address does not fit the 32-bit
    /// physical space assumed by the two-level entry format.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        debug_assert!(addr <= u32::MAX as usize);
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Get the raw address as u32 (for page table entries).
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// Check if the address is frame-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Check if the address is aligned to a huge-page boundary.
    #[inline]
    pub const fn is_huge_aligned(self) -> bool {
        self.0 & HUGE_PAGE_MASK == 0
    }

    /// Align the address up to the nearest frame boundary.
    #[inline]
    pub const fn align_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Get the frame number.
    #[inline]
    pub const fn frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Add a byte offset to this address.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }

    /// Subtract a byte offset from this address.
    #[inline]
    pub const fn sub(self, offset: usize) -> Self {
        Self(self.0 - offset)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A virtual memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        debug_assert!(addr <= u32::MAX as usize);
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is frame-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Get the page-directory index (bits [31:22]).
    #[inline]
    pub const fn dir_index(self) -> usize {
        (self.0 >> HUGE_PAGE_SHIFT) & (ENTRIES_PER_TABLE - 1)
    }

    /// Get the page-table index (bits [21:12]).
    #[inline]
    pub const fn table_index(self) -> usize {
        (self.0 >> PAGE_SHIFT) & (ENTRIES_PER_TABLE - 1)
    }

    /// Get the offset within a 4 KiB frame (bits [11:0]).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Get the offset within a 4 MiB huge page (bits [21:0]).
    #[inline]
    pub const fn huge_offset(self) -> usize {
        self.0 & HUGE_PAGE_MASK
    }

    /// Check if the address sits on a huge-page boundary.
    #[inline]
    pub const fn is_huge_aligned(self) -> bool {
        self.0 & HUGE_PAGE_MASK == 0
    }

    /// Align the address down to the nearest frame boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align the address up to the next huge-page boundary.
    #[inline]
    pub const fn huge_align_up(self) -> Self {
        Self((self.0 + HUGE_PAGE_MASK) & !HUGE_PAGE_MASK)
    }

    /// Add a byte offset to this address.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_split() {
        // 0x0040_3123 -> directory slot 1, table slot 3, offset 0x123
        let va = VirtAddr::new(0x0040_3123);
        assert_eq!(va.dir_index(), 1);
        assert_eq!(va.table_index(), 3);
        assert_eq!(va.page_offset(), 0x123);
        assert_eq!(va.huge_offset(), 0x3123);
    }

    #[test]
    fn test_page_alignment() {
        let addr = PhysAddr::new(0x0040_1234);
        assert!(!addr.is_aligned());
        assert_eq!(addr.align_up().as_usize(), 0x0040_2000);
        assert!(PhysAddr::new(0x0040_0000).is_huge_aligned());
        assert!(!PhysAddr::new(0x0040_1000).is_huge_aligned());
    }

    #[test]
    fn test_huge_rounding() {
        assert_eq!(
            VirtAddr::new(0x0040_0001).huge_align_up().as_usize(),
            0x0080_0000
        );
        assert_eq!(
            VirtAddr::new(0x0080_0000).huge_align_up().as_usize(),
            0x0080_0000
        );
    }

    #[test]
    fn test_geometry() {
        assert_eq!(HUGE_PAGE_SIZE, 4 * 1024 * 1024);
        assert_eq!(FRAMES_PER_HUGE * PAGE_SIZE, HUGE_PAGE_SIZE);
        // One table of 4-byte entries fills exactly one frame.
        assert_eq!(ENTRIES_PER_TABLE * 4, PAGE_SIZE);
    }
}
