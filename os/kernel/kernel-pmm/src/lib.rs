//! # Physical Memory Manager
//!
//! Early-boot bookkeeping of physical RAM in 2 MiB frames.
//!
//! The manager is built exactly once from the firmware (E820) memory map and
//! then hands out physically contiguous runs of frames from one of two zones.
//!
//! ## Pipeline
//!
//! ```text
//! boot buffer (count + packed E820 records)
//!     ↓ E820Table::from_boot_buffer / from_bytes
//! E820Table ──► MemoryMapSummary (max_pfn, usable bytes, 2 MiB pages)
//!     ↓ plan_zones
//! ZonePlan   (DMA below 16 MiB, Normal above; one region may split in two)
//!     ↓ MetadataLayout::compute + carve
//! Bitmap │ FrameTable │ ZoneTable      (packed right after the kernel image)
//!     ↓ reserve firmware regions, frame 0 policy, self-reservation
//! PhysicalMemoryManager ──► alloc_pages / page_init / free_pages
//! ```
//!
//! ## Frame State
//!
//! Every frame has one bitmap bit and one [`PageFrame`] record:
//!
//! | bit | flags                        | meaning                               |
//! |-----|------------------------------|---------------------------------------|
//! | 0   | empty                        | free, inside a zone                   |
//! | 1   | `USED` (+ caller flags)      | allocated                             |
//! | 1   | `RESERVED`                   | outside every zone, or firmware-owned |
//! | 1   | `KERNEL\|PRESENT\|WRITABLE\|USED` | kernel image and boot metadata   |
//!
//! For every zone `nr_free` equals the number of clear bits in its PFN range.
//! [`PhysicalMemoryManager::check_invariants`] recomputes this.
//!
//! ## Errors
//!
//! Recoverable failures ([`AllocError`], [`FreeError`]) are plain results.
//! Internal inconsistencies surface as [`FatalError`]; only the boot entry in
//! [`boot`] turns those into a halt, so all of the logic runs in hosted tests.
//!
//! ## Concurrency
//!
//! [`PhysicalMemoryManager`] needs `&mut self` for every mutation. Callers
//! sharing it between CPUs wrap it in [`LockedPmm`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod allocator;
mod bitmap;
pub mod boot;
mod e820;
mod error;
mod flags;
mod frame;
mod layout;
mod locked;
mod manager;
mod mapper;
mod zone;

pub use crate::bitmap::{Bitmap, RunMatch, SearchPath};
pub use crate::e820::{E820Entry, E820Kind, E820Table, MemoryMapSummary};
pub use crate::error::{AllocError, FatalError, FreeError, InvariantViolation, MemoryMapError};
pub use crate::flags::PageFlags;
pub use crate::frame::{FrameTable, PageFrame, Pfn};
pub use crate::layout::{MetadataLayout, Section};
pub use crate::locked::{LockedPmm, PmmGuard};
pub use crate::manager::{HugePageInfo, PhysicalMemoryManager};
pub use crate::mapper::{HhdmPhysMapper, OffsetPhysMapper, PhysMapper};
pub use crate::zone::{Zone, ZoneId, ZonePlan, ZoneSpan, ZoneTable, ZoneType, plan_zones};

use kernel_memory_addresses::{PageSize, Size2M, Size4K};

/// Size class of every frame this manager hands out.
pub type FrameSize = Size2M;

/// Bytes per managed frame.
pub const FRAME_SIZE: u64 = FrameSize::SIZE;

/// Capacity of the in-memory E820 table; surplus firmware entries are dropped.
pub const E820_MAX_ENTRIES: usize = 64;

/// Physical boundary between `ZONE_DMA` and `ZONE_NORMAL`.
pub const DMA_ZONE_LIMIT: u64 = 16 * 1024 * 1024;

/// Alignment of each metadata structure's start address.
pub const METADATA_ALIGN: u64 = Size4K::SIZE;

/// Alignment of each metadata structure's size and of the metadata end.
pub const METADATA_TAIL_ALIGN: u64 = 64;

const _: () = {
    assert!(DMA_ZONE_LIMIT.is_multiple_of(FRAME_SIZE));
    assert!(METADATA_ALIGN.is_power_of_two());
    assert!(METADATA_TAIL_ALIGN.is_power_of_two());
    assert!(METADATA_ALIGN.is_multiple_of(METADATA_TAIL_ALIGN));
    assert!(E820_MAX_ENTRIES > 0);
};
