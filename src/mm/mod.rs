//! Memory management for the Ocelot teaching kernel
//!
//! Provides:
//! - Physical frame allocation ([`pool`])
//! - Contiguous 4 MiB run allocation ([`huge`])
//! - Per-address-space page tables and superpage promotion
//!   ([`space`], [`promote`])
//! - Translation queries ([`query`])
//!
//! The only data shared across cores is the frame pool's free list,
//! guarded by a single spinlock. Address-space mutation is per-process
//! and serialized by the process layer.

pub mod address;
pub mod hal;
pub mod huge;
pub mod paging;
pub mod pool;
pub mod promote;
pub mod query;
pub mod sim;
pub mod space;

pub use address::{PhysAddr, VirtAddr, FRAMES_PER_HUGE, HUGE_PAGE_SIZE, PAGE_SIZE};
pub use hal::Machine;
pub use huge::Exhausted;
pub use paging::{MappingError, PageFlags, PageTableEntry};
pub use pool::{FramePool, PoolState};
pub use promote::VmOpError;
pub use space::AddressSpace;
