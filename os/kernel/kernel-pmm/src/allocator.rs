use crate::error::{AllocError, FatalError, FreeError};
use crate::flags::PageFlags;
use crate::frame::Pfn;
use crate::manager::PhysicalMemoryManager;
use crate::zone::ZoneType;
use log::{debug, warn};

impl PhysicalMemoryManager<'_> {
    /// Allocate `nr_pages` physically contiguous 2 MiB frames.
    ///
    /// The first zone of `zone_type` (in table order) with enough free frames
    /// is searched; there is no fallback to another zone or zone type. Every
    /// frame of the run gets its bit set and `flags | USED` stamped on it.
    ///
    /// Returns the first frame of the run; the caller tracks the length.
    ///
    /// # Errors
    /// * [`AllocError::ZeroPages`], [`AllocError::NoZoneWithCapacity`] and
    ///   [`AllocError::NoContiguousRun`] leave the manager untouched.
    /// * [`AllocError::Fatal`] reports corrupted metadata.
    pub fn alloc_pages(
        &mut self,
        zone_type: ZoneType,
        nr_pages: usize,
        flags: PageFlags,
    ) -> Result<Pfn, AllocError> {
        if nr_pages == 0 {
            warn!("Refusing to allocate 0 pages from {zone_type}");
            return Err(AllocError::ZeroPages);
        }

        let Some(zone) = self.zones.first_fit(zone_type, nr_pages).copied() else {
            warn!("Not enough free pages in {zone_type} (request {nr_pages} pages)");
            return Err(AllocError::NoZoneWithCapacity {
                zone_type,
                requested: nr_pages,
            });
        };
        let id = zone.id();

        debug!(
            "Searching {nr_pages} pages in zone {id} (start_pfn={}, end_pfn={})",
            zone.start_pfn().index(),
            zone.end_pfn().index()
        );

        let Some(found) = self.bitmap.find_run(zone.pfn_range(), nr_pages) else {
            warn!("No run of {nr_pages} contiguous pages in zone {id} ({zone_type})");
            return Err(AllocError::NoContiguousRun {
                zone_type,
                requested: nr_pages,
            });
        };

        for pfn in Pfn::iter(found.start.run(nr_pages)) {
            self.bitmap.set(pfn);
            self.page_init(pfn, flags)?;
        }

        let nr_free = self.zones.get(id).map_or(0, |z| z.nr_free());
        debug!(
            "Allocated {nr_pages} pages at pfn {} via {:?}; zone {id} nr_free {} -> {nr_free}",
            found.start.index(),
            found.path,
            zone.nr_free()
        );
        debug_assert_eq!(nr_free + nr_pages as u64, zone.nr_free());

        Ok(found.start)
    }

    /// Update the metadata of a frame handed out by the caller.
    ///
    /// * A free frame becomes `flags | USED` with a reference count of one and
    ///   is charged to its zone and the global counter. Frame 0 stays attached
    ///   to zone 0 even where that zone does not cover it; such a frame is
    ///   never charged.
    /// * A used frame where either side carries `USER` is shared: the flags
    ///   are merged and the reference count goes up.
    /// * Any other used frame only has the flags merged.
    ///
    /// The bitmap is the caller's business.
    ///
    /// # Errors
    /// [`FatalError`] if the frame is not tracked, has no zone, or its zone's
    /// counter would underflow.
    pub fn page_init(&mut self, pfn: Pfn, flags: PageFlags) -> Result<(), FatalError> {
        let frame = self
            .frames
            .get_mut(pfn)
            .ok_or(FatalError::FrameOutOfRange { pfn })?;
        let zone = frame.zone().ok_or(FatalError::FrameWithoutZone { pfn })?;
        let current = frame.flags();
        let counted = self.zones.get(zone).is_some_and(|z| z.contains(pfn));

        if !current.used() {
            frame.set_flags(flags | PageFlags::USED);
            frame.set_ref_count(1);
            if counted {
                self.take_free(zone, pfn)?;
            }
        } else if current.user() || flags.user() {
            frame.set_flags(current | flags);
            frame.set_ref_count(frame.ref_count().saturating_add(1));
        } else {
            frame.set_flags(current | flags);
        }
        Ok(())
    }

    /// Release `nr_pages` frames starting at `pfn`.
    ///
    /// Every frame drops one reference. A frame reaching zero references is
    /// cleared, its bit is cleared and it is credited back to its zone.
    /// Shared frames stay allocated until their last reference goes.
    ///
    /// # Errors
    /// The whole run is checked before anything changes. Frames outside the
    /// table, not allocated, or owned by the kernel image are refused.
    pub fn free_pages(&mut self, pfn: Pfn, nr_pages: usize) -> Result<(), FreeError> {
        if nr_pages == 0 {
            return Err(FreeError::ZeroPages);
        }
        let end = pfn
            .checked_add(nr_pages)
            .ok_or(FreeError::OutOfRange { pfn })?;
        if end > self.frames.end() {
            return Err(FreeError::OutOfRange {
                pfn: self.frames.end().max(pfn),
            });
        }

        for p in Pfn::iter(pfn..end) {
            let frame = self.frames.get(p).ok_or(FreeError::OutOfRange { pfn: p })?;
            if frame.flags().kernel() {
                return Err(FreeError::KernelOwned { pfn: p });
            }
            if frame.zone().is_none() || !frame.is_used() || !self.bitmap.is_set(p) {
                return Err(FreeError::NotAllocated { pfn: p });
            }
        }

        for p in Pfn::iter(pfn..end) {
            let Some(frame) = self.frames.get_mut(p) else {
                continue;
            };
            let remaining = frame.ref_count().saturating_sub(1);
            frame.set_ref_count(remaining);
            if remaining > 0 {
                continue;
            }

            frame.set_flags(PageFlags::EMPTY);
            let zone = frame.zone();
            self.bitmap.clear(p);
            if let Some(id) = zone
                && self.zones.get(id).is_some_and(|z| z.contains(p))
            {
                self.give_free(id);
            }
        }

        debug!("Freed {nr_pages} pages at pfn {}", pfn.index());
        Ok(())
    }
}
