use crate::frame::Pfn;
use crate::zone::{ZoneId, ZoneType};

/// The boot memory map buffer could not be decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryMapError {
    #[error("memory map buffer is too short to hold the entry count")]
    MissingHeader,
    #[error("memory map declares {expected} bytes of entries but only {available} are present")]
    Truncated { expected: usize, available: usize },
}

/// Corruption of the manager's own bookkeeping.
///
/// None of these can be caused by a caller's request; the boot path halts on
/// them (see [`boot::halt`](crate::boot::halt)).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error("{pfn} has no owning zone")]
    FrameWithoutZone { pfn: Pfn },
    #[error("zone ends at {zone_end} beyond the highest frame {max_pfn}")]
    ZoneBeyondMaxPfn { zone_end: Pfn, max_pfn: Pfn },
    #[error("the memory map contains no usable 2 MiB frame")]
    NoUsableMemory,
    #[error("{pfn} is outside the frame table")]
    FrameOutOfRange { pfn: Pfn },
    #[error("free page counter underflow at {pfn}")]
    FreeCountUnderflow { pfn: Pfn },
    #[error("boot metadata does not fit into the address space")]
    MetadataOverflow,
}

/// Why [`alloc_pages`](crate::PhysicalMemoryManager::alloc_pages) failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("requested zero pages")]
    ZeroPages,
    #[error("no {zone_type} zone has {requested} free pages")]
    NoZoneWithCapacity {
        zone_type: ZoneType,
        requested: usize,
    },
    #[error("no run of {requested} contiguous free pages in {zone_type}")]
    NoContiguousRun {
        zone_type: ZoneType,
        requested: usize,
    },
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl AllocError {
    /// Whether the caller must halt instead of handling the failure.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// The underlying corruption, if any.
    #[must_use]
    pub const fn fatal(&self) -> Option<FatalError> {
        match self {
            Self::Fatal(err) => Some(*err),
            _ => None,
        }
    }
}

/// Why [`free_pages`](crate::PhysicalMemoryManager::free_pages) refused a run.
///
/// The run is validated as a whole; on error nothing was released.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    #[error("requested to free zero pages")]
    ZeroPages,
    #[error("{pfn} is outside the frame table")]
    OutOfRange { pfn: Pfn },
    #[error("{pfn} is not allocated")]
    NotAllocated { pfn: Pfn },
    #[error("{pfn} belongs to the kernel image or boot metadata")]
    KernelOwned { pfn: Pfn },
}

/// A bookkeeping inconsistency found by
/// [`check_invariants`](crate::PhysicalMemoryManager::check_invariants).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("zone {zone} records {recorded} free pages but the bitmap has {actual}")]
    FreeCountMismatch {
        zone: ZoneId,
        recorded: u64,
        actual: u64,
    },
    #[error("{pfn} lies outside every zone but is not reserved")]
    UnreservedOutsideZones { pfn: Pfn },
    #[error("global free counter is {recorded} but zones hold {actual}")]
    GlobalFreeMismatch { recorded: u64, actual: u64 },
}
