use crate::e820::E820Table;
use crate::error::FatalError;
use crate::frame::Pfn;
use crate::{DMA_ZONE_LIMIT, E820_MAX_ENTRIES};
use core::fmt;
use core::ops::Range;
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, info, warn};

/// Allocation class of a zone.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ZoneType {
    /// Below [`DMA_ZONE_LIMIT`], reachable by legacy DMA engines.
    Dma,
    /// At or above [`DMA_ZONE_LIMIT`].
    Normal,
}

impl ZoneType {
    /// Class of a zone starting at `start`.
    #[must_use]
    pub const fn for_start(start: PhysicalAddress) -> Self {
        if start.as_u64() < DMA_ZONE_LIMIT {
            Self::Dma
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dma => "ZONE_DMA",
            Self::Normal => "ZONE_NORMAL",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a zone in the [`ZoneTable`].
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ZoneId(u32);

impl ZoneId {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Frame range and class of a zone, before any storage exists for it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ZoneSpan {
    pub start_pfn: Pfn,
    /// Exclusive.
    pub end_pfn: Pfn,
    pub zone_type: ZoneType,
}

impl ZoneSpan {
    const EMPTY: Self = Self {
        start_pfn: Pfn::new(0),
        end_pfn: Pfn::new(0),
        zone_type: ZoneType::Dma,
    };

    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        (self.end_pfn.index() - self.start_pfn.index()) as u64
    }

    #[must_use]
    pub const fn pfn_range(&self) -> Range<Pfn> {
        self.start_pfn..self.end_pfn
    }
}

/// Upper bound of zones one memory map can produce: every entry may straddle
/// the DMA boundary once.
pub const ZONE_PLAN_CAPACITY: usize = 2 * E820_MAX_ENTRIES;

/// Ordered zone spans derived from a memory map by [`plan_zones`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ZonePlan {
    spans: [ZoneSpan; ZONE_PLAN_CAPACITY],
    len: usize,
}

impl ZonePlan {
    const fn new() -> Self {
        Self {
            spans: [ZoneSpan::EMPTY; ZONE_PLAN_CAPACITY],
            len: 0,
        }
    }

    fn push(&mut self, span: ZoneSpan, max_pfn: Pfn) -> Result<(), FatalError> {
        if span.end_pfn > max_pfn {
            return Err(FatalError::ZoneBeyondMaxPfn {
                zone_end: span.end_pfn,
                max_pfn,
            });
        }

        let slot = self
            .spans
            .get_mut(self.len)
            .ok_or(FatalError::MetadataOverflow)?;
        *slot = span;
        self.len += 1;
        Ok(())
    }

    /// First planned span sharing a frame with `range`.
    fn first_overlap(&self, range: &Range<Pfn>) -> Option<ZoneSpan> {
        self.iter()
            .find(|s| s.start_pfn < range.end && range.start < s.end_pfn)
            .copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ZoneSpan] {
        &self.spans[..self.len]
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneSpan> {
        self.as_slice().iter()
    }

    /// Frames covered by all zones.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.iter().map(ZoneSpan::total_pages).sum()
    }
}

/// Derive the zones of a memory map.
///
/// Each usable entry is shrunk to whole 2 MiB frames; entries left empty are
/// skipped. Frames already claimed by an earlier entry are cut out, so zones
/// never share a frame. A region crossing [`DMA_ZONE_LIMIT`] yields a DMA zone
/// below and a Normal zone above the limit. Zones keep the order of the map.
///
/// # Errors
/// [`FatalError::ZoneBeyondMaxPfn`] if a zone ends past `max_pfn`, which means
/// `max_pfn` was not derived from the same map.
pub fn plan_zones(map: &E820Table, max_pfn: Pfn) -> Result<ZonePlan, FatalError> {
    let mut plan = ZonePlan::new();

    for (index, entry) in map.iter().enumerate() {
        if !entry.is_usable() || entry.length() == 0 {
            continue;
        }

        let Some((start, end)) = entry.frame_aligned() else {
            debug!(
                "Skip non-alignable area: entry[{index:02}] base={}, length={:#x}",
                entry.base(),
                entry.length()
            );
            continue;
        };

        debug!("Alignment area: entry[{index:02}] {start} - {end}");
        push_unclaimed(&mut plan, Pfn::containing(start), Pfn::containing(end), max_pfn)?;
    }

    Ok(plan)
}

/// Plan the frames of `start..end` no planned zone covers yet.
///
/// Every overlap splits the range around the zone that already owns the
/// frames; at most two pieces remain per overlap.
fn push_unclaimed(
    plan: &mut ZonePlan,
    start: Pfn,
    end: Pfn,
    max_pfn: Pfn,
) -> Result<(), FatalError> {
    if start >= end {
        return Ok(());
    }

    if let Some(owner) = plan.first_overlap(&(start..end)) {
        warn!(
            "Overlapping usable area: pfn {start}..{end} already in {} pfn {}..{}",
            owner.zone_type, owner.start_pfn, owner.end_pfn
        );
        push_unclaimed(plan, start, owner.start_pfn, max_pfn)?;
        return push_unclaimed(plan, owner.end_pfn, end, max_pfn);
    }

    let limit = Pfn::containing(PhysicalAddress::new(DMA_ZONE_LIMIT));
    if start < limit && end > limit {
        plan.push(span(start, limit, ZoneType::Dma), max_pfn)?;
        plan.push(span(limit, end, ZoneType::Normal), max_pfn)
    } else {
        let zone_type = ZoneType::for_start(start.start_address());
        plan.push(span(start, end, zone_type), max_pfn)
    }
}

const fn span(start_pfn: Pfn, end_pfn: Pfn, zone_type: ZoneType) -> ZoneSpan {
    ZoneSpan {
        start_pfn,
        end_pfn,
        zone_type,
    }
}

/// A contiguous run of frames of one [`ZoneType`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Zone {
    id: ZoneId,
    start_pfn: Pfn,
    end_pfn: Pfn,
    total_pages: u64,
    nr_free: u64,
    zone_type: ZoneType,
}

impl Zone {
    /// Placeholder for table slots no zone was created for.
    pub const UNUSED: Self = Self {
        id: ZoneId(u32::MAX),
        start_pfn: Pfn::new(0),
        end_pfn: Pfn::new(0),
        total_pages: 0,
        nr_free: 0,
        zone_type: ZoneType::Dma,
    };

    #[must_use]
    pub const fn from_span(id: ZoneId, span: &ZoneSpan) -> Self {
        let total_pages = span.total_pages();
        Self {
            id,
            start_pfn: span.start_pfn,
            end_pfn: span.end_pfn,
            total_pages,
            nr_free: total_pages,
            zone_type: span.zone_type,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ZoneId {
        self.id
    }

    #[must_use]
    pub const fn start_pfn(&self) -> Pfn {
        self.start_pfn
    }

    /// Exclusive.
    #[must_use]
    pub const fn end_pfn(&self) -> Pfn {
        self.end_pfn
    }

    #[must_use]
    pub const fn pfn_range(&self) -> Range<Pfn> {
        self.start_pfn..self.end_pfn
    }

    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }

    #[must_use]
    pub const fn nr_free(&self) -> u64 {
        self.nr_free
    }

    #[must_use]
    pub const fn zone_type(&self) -> ZoneType {
        self.zone_type
    }

    /// Half-open membership test.
    #[must_use]
    pub const fn contains(&self, pfn: Pfn) -> bool {
        pfn.index() >= self.start_pfn.index() && pfn.index() < self.end_pfn.index()
    }

    pub(crate) fn take_free(&mut self, pfn: Pfn) -> Result<(), FatalError> {
        self.nr_free = self
            .nr_free
            .checked_sub(1)
            .ok_or(FatalError::FreeCountUnderflow { pfn })?;
        Ok(())
    }

    pub(crate) const fn give_free(&mut self) {
        self.nr_free += 1;
    }
}

/// Append-only table of zones over boot-carved storage.
pub struct ZoneTable<'m> {
    slots: &'m mut [Zone],
    len: usize,
}

impl<'m> ZoneTable<'m> {
    #[must_use]
    pub const fn new(slots: &'m mut [Zone]) -> Self {
        Self { slots, len: 0 }
    }

    /// Number of slots, used or not.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Zone] {
        &self.slots[..self.len]
    }

    #[must_use]
    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.as_slice().get(id.index())
    }

    pub fn get_mut(&mut self, id: ZoneId) -> Option<&mut Zone> {
        self.slots[..self.len].get_mut(id.index())
    }

    /// Install a zone built from `span` in the next free slot.
    ///
    /// # Errors
    /// [`FatalError::MetadataOverflow`] if every slot is taken.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, span: &ZoneSpan) -> Result<ZoneId, FatalError> {
        let id = ZoneId(self.len as u32);
        let slot = self
            .slots
            .get_mut(self.len)
            .ok_or(FatalError::MetadataOverflow)?;
        *slot = Zone::from_span(id, span);
        self.len += 1;

        info!(
            "Created {}: start_pfn={}, end_pfn={}, pages={}",
            span.zone_type,
            span.start_pfn.index(),
            span.end_pfn.index(),
            span.total_pages()
        );
        Ok(id)
    }

    /// Zone whose `[start_pfn, end_pfn)` holds `pfn`.
    #[must_use]
    pub fn containing(&self, pfn: Pfn) -> Option<ZoneId> {
        self.as_slice()
            .iter()
            .find(|zone| zone.contains(pfn))
            .map(Zone::id)
    }

    /// First zone of `zone_type`, in table order, with at least `nr_pages`
    /// free frames.
    #[must_use]
    pub fn first_fit(&self, zone_type: ZoneType, nr_pages: usize) -> Option<&Zone> {
        self.as_slice()
            .iter()
            .find(|zone| zone.zone_type == zone_type && zone.nr_free >= nr_pages as u64)
    }

    /// Sum of `nr_free` over all zones.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.as_slice().iter().map(Zone::nr_free).sum()
    }
}

impl fmt::Debug for ZoneTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}
