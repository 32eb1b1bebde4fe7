//! Page Directory and Page Table Entries
//!
//! Two-level 32-bit paging structures. A page directory holds 1024
//! entries, each covering 4 MiB of virtual space; an entry either points
//! at a page table (1024 entries mapping one 4 KiB frame each) or, with
//! the large-page bit set, maps its whole 4 MiB slot directly onto a
//! physically contiguous huge frame.
//!
//! Directory and table entries share one 32-bit format, so a single
//! [`PageTableEntry`] type serves both levels.

use core::ops::{Index, IndexMut};

use bitflags::bitflags;

use super::address::{PhysAddr, ENTRIES_PER_TABLE};

bitflags! {
    /// Flag bits of a page directory or page table entry.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PageFlags: u32 {
        /// Entry maps something; translation through an absent entry faults.
        const PRESENT = 1 << 0;
        /// Writes allowed.
        const WRITABLE = 1 << 1;
        /// User-mode access allowed.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const NO_CACHE = 1 << 4;
        /// Set by hardware on first access.
        const ACCESSED = 1 << 5;
        /// Set by hardware on first write.
        const DIRTY = 1 << 6;
        /// Directory entries only: maps a 4 MiB huge frame directly
        /// instead of pointing at a page table.
        const LARGE = 1 << 7;
    }
}

impl PageFlags {
    /// The flag set installed on promoted and demoted user mappings.
    pub const USER_RW: Self = Self::PRESENT.union(Self::WRITABLE).union(Self::USER);
}

/// A single page directory or page table entry.
///
/// Bits [31:12] hold the frame address (for a large directory entry the
/// base is 4 MiB-aligned, so the same mask applies); bits [11:0] hold
/// the flags.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Address mask (bits [31:12]).
    const ADDR_MASK: u32 = 0xffff_f000;

    /// Create an absent (empty) entry.
    #[inline]
    pub const fn absent() -> Self {
        Self(0)
    }

    /// Create an entry mapping `addr` with the given flags.
    ///
    /// The previous contents of the address field are irrelevant; the
    /// entry is built from scratch.
    #[inline]
    pub const fn new(addr: PhysAddr, flags: PageFlags) -> Self {
        debug_assert!(addr.is_aligned());
        Self((addr.as_u32() & Self::ADDR_MASK) | flags.bits())
    }

    /// Check if the entry is present.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    /// Check if this is a present large-page directory entry.
    #[inline]
    pub const fn is_large(self) -> bool {
        self.is_present() && self.0 & PageFlags::LARGE.bits() != 0
    }

    /// Get the physical address from this entry.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new((self.0 & Self::ADDR_MASK) as usize)
    }

    /// Get the flags from this entry.
    #[inline]
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & !Self::ADDR_MASK)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "Entry(addr={}, flags={:?})", self.addr(), self.flags())
        } else {
            write!(f, "Entry(absent)")
        }
    }
}

/// A page directory or page table: 1024 entries, exactly one frame.
///
/// Lives inside a frame obtained from the frame pool and is only ever
/// accessed through [`Machine::frame_ptr`](super::hal::Machine::frame_ptr).
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// The virtual address is not mapped.
    NotMapped,
    /// No physical frames available.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
        }
    }
}
