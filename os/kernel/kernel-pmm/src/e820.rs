use crate::error::MemoryMapError;
use crate::frame::Pfn;
use crate::{E820_MAX_ENTRIES, FrameSize};
use core::fmt;
use core::ops::Range;
use kernel_info::boot::{E820_ENTRY_SIZE, E820_HEADER_SIZE, E820_TYPE_RAM, RawE820Entry};
use kernel_memory_addresses::{PageSize, PhysicalAddress};
use log::{info, warn};

/// Region type of an E820 entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum E820Kind {
    Ram,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    Unknown(u32),
}

impl E820Kind {
    #[must_use]
    pub const fn from_raw(kind: u32) -> Self {
        match kind {
            E820_TYPE_RAM => Self::Ram,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ram => "RAM",
            Self::Reserved => "ROM or Reserved",
            Self::AcpiReclaimable => "ACPI Reclaim Memory",
            Self::AcpiNvs => "ACPI NVS Memory",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for E820Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded memory map entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct E820Entry {
    base: PhysicalAddress,
    length: u64,
    kind: u32,
}

impl E820Entry {
    #[must_use]
    pub const fn new(base: PhysicalAddress, length: u64, kind: u32) -> Self {
        Self { base, length, kind }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Exclusive end; saturates for entries running off the address space.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64().saturating_add(self.length))
    }

    #[must_use]
    pub const fn kind(&self) -> E820Kind {
        E820Kind::from_raw(self.kind)
    }

    #[must_use]
    pub const fn raw_kind(&self) -> u32 {
        self.kind
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.kind == E820_TYPE_RAM
    }

    /// The entry shrunk to whole frames, `None` if no frame fits.
    #[must_use]
    pub fn frame_aligned(&self) -> Option<(PhysicalAddress, PhysicalAddress)> {
        let start = self.base.checked_align_up::<FrameSize>()?;
        let end = self.end().align_down::<FrameSize>();
        (start < end).then_some((start, end))
    }

    /// Frames lying entirely inside the entry.
    #[must_use]
    pub fn covered_frames(&self) -> Range<Pfn> {
        let start = Pfn::at_or_above(self.base);
        let end = Pfn::containing(self.end());
        if start < end { start..end } else { start..start }
    }
}

impl From<RawE820Entry> for E820Entry {
    fn from(raw: RawE820Entry) -> Self {
        Self::new(PhysicalAddress::new(raw.base()), raw.length(), raw.kind)
    }
}

/// Bounded copy of the firmware memory map.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct E820Table {
    entries: [E820Entry; E820_MAX_ENTRIES],
    len: usize,
    reported: usize,
}

impl Default for E820Table {
    fn default() -> Self {
        Self::new()
    }
}

impl E820Table {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [E820Entry::new(PhysicalAddress::zero(), 0, 0); E820_MAX_ENTRIES],
            len: 0,
            reported: 0,
        }
    }

    /// Copy at most [`E820_MAX_ENTRIES`] of the `reported` records.
    ///
    /// Surplus records are dropped with a warning.
    pub fn from_raw<I>(reported: usize, raw: I) -> Self
    where
        I: IntoIterator<Item = RawE820Entry>,
    {
        if reported > E820_MAX_ENTRIES {
            warn!(
                "E820 map reports {reported} entries, keeping the first {E820_MAX_ENTRIES}"
            );
        }

        let mut table = Self::new();
        table.reported = reported;
        for (slot, entry) in table
            .entries
            .iter_mut()
            .zip(raw.into_iter().take(reported))
        {
            *slot = entry.into();
            table.len += 1;
        }
        table
    }

    /// Decode the boot buffer format: a little-endian `u32` count followed by
    /// packed 20-byte records.
    ///
    /// # Errors
    /// Fails if the buffer is shorter than the count or than the records that
    /// are kept.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MemoryMapError> {
        let (header, body) = bytes
            .split_first_chunk::<E820_HEADER_SIZE>()
            .ok_or(MemoryMapError::MissingHeader)?;
        let reported = u32::from_le_bytes(*header) as usize;

        let kept = reported.min(E820_MAX_ENTRIES);
        let expected = kept * E820_ENTRY_SIZE;
        if body.len() < expected {
            return Err(MemoryMapError::Truncated {
                expected,
                available: body.len(),
            });
        }

        let records = body[..expected]
            .chunks_exact(E820_ENTRY_SIZE)
            .filter_map(|chunk| chunk.try_into().ok())
            .map(RawE820Entry::from_le_bytes);
        Ok(Self::from_raw(reported, records))
    }

    /// Copy the memory map out of the boot buffer at `buffer`.
    ///
    /// # Safety
    /// `buffer` must point to a readable count followed by at least
    /// `min(count, E820_MAX_ENTRIES)` records.
    #[must_use]
    pub unsafe fn from_boot_buffer(buffer: *const u8) -> Self {
        // SAFETY: caller guarantees the header is readable.
        let reported = u32::from_le(unsafe { buffer.cast::<u32>().read_unaligned() }) as usize;
        // SAFETY: records follow the header directly.
        let records = unsafe { buffer.add(E820_HEADER_SIZE) }.cast::<RawE820Entry>();

        let kept = reported.min(E820_MAX_ENTRIES);
        Self::from_raw(
            reported,
            // SAFETY: caller guarantees `kept` records are readable.
            (0..kept).map(|i| unsafe { records.add(i).read_unaligned() }),
        )
    }

    #[must_use]
    pub fn as_slice(&self) -> &[E820Entry] {
        &self.entries[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &E820Entry> {
        self.as_slice().iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&E820Entry> {
        self.as_slice().get(index)
    }

    /// Number of entries kept.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries the firmware reported.
    #[must_use]
    pub const fn reported_len(&self) -> usize {
        self.reported
    }

    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.reported > self.len
    }
}

impl fmt::Debug for E820Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("E820Table")
            .field("entries", &self.as_slice())
            .field("reported", &self.reported)
            .finish()
    }
}

/// Totals derived from a memory map before any zone exists.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryMapSummary {
    max_pfn: Pfn,
    usable_bytes: u64,
    total_2m_pages: u64,
}

impl MemoryMapSummary {
    /// Walk the map once, logging every entry.
    #[must_use]
    pub fn scan(map: &E820Table) -> Self {
        let mut summary = Self::default();

        for (index, entry) in map.iter().enumerate() {
            info!(
                "E820 entry[{index:02}]: base={}, length={:#018x}, type={} ({})",
                entry.base(),
                entry.length(),
                entry.raw_kind(),
                entry.kind()
            );

            summary.max_pfn = summary.max_pfn.max(Pfn::containing(entry.end()));

            if !entry.is_usable() || entry.length() == 0 {
                continue;
            }
            summary.usable_bytes = summary.usable_bytes.saturating_add(entry.length());
            if let Some((start, end)) = entry.frame_aligned() {
                summary.total_2m_pages += (end - start) >> FrameSize::SHIFT;
            }
        }

        info!(
            "Total memory: {} MiB usable, {} 2M pages, max_pfn={}",
            summary.usable_bytes >> 20,
            summary.total_2m_pages,
            summary.max_pfn.index()
        );
        summary
    }

    /// Highest frame number ended by any entry.
    #[must_use]
    pub const fn max_pfn(&self) -> Pfn {
        self.max_pfn
    }

    /// Frames tracked by the bitmap and frame table: `max_pfn + 1`.
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.max_pfn.index() + 1
    }

    #[must_use]
    pub const fn usable_bytes(&self) -> u64 {
        self.usable_bytes
    }

    #[must_use]
    pub const fn total_2m_pages(&self) -> u64 {
        self.total_2m_pages
    }
}
