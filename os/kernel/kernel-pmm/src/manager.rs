use crate::bitmap::Bitmap;
use crate::e820::{E820Table, MemoryMapSummary};
use crate::error::{FatalError, InvariantViolation};
use crate::flags::PageFlags;
use crate::frame::{FrameTable, PageFrame, Pfn};
use crate::layout::MetadataLayout;
use crate::mapper::PhysMapper;
use crate::zone::{Zone, ZoneId, ZonePlan, ZoneTable, plan_zones};
use core::fmt;
use core::ops::Range;
use kernel_info::boot::KernelImage;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{debug, info, warn};

/// 2 MiB page accounting across all zones.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HugePageInfo {
    pub(crate) total_2m_pages: u64,
    pub(crate) free_2m_pages: u64,
}

impl HugePageInfo {
    /// Frames handed to zones at boot.
    #[must_use]
    pub const fn total_2m_pages(&self) -> u64 {
        self.total_2m_pages
    }

    /// Frames currently free in any zone.
    #[must_use]
    pub const fn free_2m_pages(&self) -> u64 {
        self.free_2m_pages
    }
}

/// Owner of all physical memory bookkeeping.
///
/// Built once by [`PhysicalMemoryManager::new`]; the metadata it manages
/// lives in memory carved out right behind the kernel image and borrowed for
/// `'m`.
pub struct PhysicalMemoryManager<'m> {
    memory_map: E820Table,
    summary: MemoryMapSummary,
    image: KernelImage,
    layout: MetadataLayout,
    pub(crate) bitmap: Bitmap<'m>,
    pub(crate) frames: FrameTable<'m>,
    pub(crate) zones: ZoneTable<'m>,
    pub(crate) huge_pages: HugePageInfo,
    boot_reserved: Range<Pfn>,
}

impl<'m> PhysicalMemoryManager<'m> {
    /// Build the manager from a memory map.
    ///
    /// Steps, in order:
    /// 1. summarize the map and plan the zones,
    /// 2. lay out and initialize bitmap, frame table and zone table after
    ///    `image.end_krnl`,
    /// 3. install the zones, marking their frames free,
    /// 4. reserve frames fully covered by non-RAM entries,
    /// 5. attach frame 0 to the first zone and mark it free,
    /// 6. reserve the frames holding the kernel image and the metadata.
    ///
    /// # Safety
    /// * The memory from `image.end_krnl` up to the end of the computed
    ///   [`MetadataLayout`] must be writable and unused by anything else
    ///   for `'m`.
    /// * `mapper` must translate the image and metadata addresses to the
    ///   physical frames backing them.
    ///
    /// # Errors
    /// Any [`FatalError`]; the manager is unusable and the caller should halt.
    pub unsafe fn new<M>(
        memory_map: E820Table,
        image: KernelImage,
        mapper: &M,
    ) -> Result<Self, FatalError>
    where
        M: PhysMapper + ?Sized,
    {
        if !image.is_well_ordered() {
            warn!("Kernel image boundaries are out of order: {image:?}");
        }

        let summary = MemoryMapSummary::scan(&memory_map);
        let plan = plan_zones(&memory_map, summary.max_pfn())?;
        if plan.is_empty() {
            return Err(FatalError::NoUsableMemory);
        }

        let zone_slots = (memory_map.len() + 1).max(plan.len());
        let layout = MetadataLayout::compute(
            VirtualAddress::new(image.end_krnl),
            summary.frame_count(),
            zone_slots,
        )?;

        // SAFETY: the caller hands us the memory behind the image.
        let storage = unsafe { layout.carve() };

        let mut pmm = Self {
            memory_map,
            summary,
            image,
            layout,
            bitmap: Bitmap::new(storage.bitmap, summary.frame_count()),
            frames: FrameTable::new(storage.frames),
            zones: ZoneTable::new(storage.zones),
            huge_pages: HugePageInfo {
                total_2m_pages: summary.total_2m_pages(),
                free_2m_pages: 0,
            },
            boot_reserved: Pfn::new(0)..Pfn::new(0),
        };

        pmm.install_zones(&plan)?;
        pmm.reserve_firmware_regions()?;
        pmm.release_frame_zero();
        pmm.log_layout();
        pmm.reserve_boot_metadata(mapper)?;
        pmm.log_zones();

        Ok(pmm)
    }

    fn install_zones(&mut self, plan: &ZonePlan) -> Result<(), FatalError> {
        for span in plan.iter() {
            let id = self.zones.push(span)?;
            let frames = self
                .frames
                .slice_mut(span.pfn_range())
                .ok_or(FatalError::FrameOutOfRange { pfn: span.end_pfn })?;
            for (frame, pfn) in frames.iter_mut().zip(Pfn::iter(span.pfn_range())) {
                *frame = PageFrame::free_in(id, pfn);
            }
            for pfn in Pfn::iter(span.pfn_range()) {
                self.bitmap.clear(pfn);
            }
            self.huge_pages.free_2m_pages += span.total_pages();
        }
        Ok(())
    }

    fn reserve_firmware_regions(&mut self) -> Result<(), FatalError> {
        let limit = self.frames.end();
        for index in 0..self.memory_map.len() {
            let Some(entry) = self.memory_map.get(index).copied() else {
                break;
            };
            if entry.is_usable() {
                continue;
            }

            let covered = entry.covered_frames();
            let range = covered.start.min(limit)..covered.end.min(limit);
            if range.is_empty() {
                continue;
            }
            debug!(
                "Reserve {} region: pfn {} - {}",
                entry.kind(),
                range.start.index(),
                range.end.index()
            );

            for pfn in Pfn::iter(range) {
                self.mark_unavailable(pfn)?;
                if let Some(frame) = self.frames.get_mut(pfn) {
                    frame.set_flags(frame.flags() | PageFlags::RESERVED);
                }
            }
        }
        Ok(())
    }

    /// Frame 0 is always treated as usable and attached to the first zone,
    /// whatever the map says about it.
    ///
    /// The first zone need not cover frame 0, e.g. when the low entry of the
    /// map cannot hold a whole frame. The attachment then only names a zone;
    /// the counters of that zone never include frame 0.
    fn release_frame_zero(&mut self) {
        let pfn = Pfn::new(0);
        if let Some(frame) = self.frames.get_mut(pfn) {
            *frame = PageFrame::free_in(ZoneId::new(0), pfn);
        }
        if self.bitmap.clear(pfn)
            && let Some(id) = self.zones.containing(pfn)
        {
            self.give_free(id);
        }
    }

    fn reserve_boot_metadata<M>(&mut self, mapper: &M) -> Result<(), FatalError>
    where
        M: PhysMapper + ?Sized,
    {
        let first = VirtualAddress::new(self.image.start_code).min(self.layout.bitmap().start());
        let start = Pfn::containing(mapper.virt_to_phys(first));
        let end = Pfn::at_or_above(mapper.virt_to_phys(self.layout.struct_end()));

        let limit = self.frames.end();
        if end > limit {
            warn!("Boot metadata ends at {end}, past the last tracked frame {limit}");
        }
        let range = start.min(limit)..end.min(limit);

        for pfn in Pfn::iter(range.clone()) {
            self.mark_unavailable(pfn)?;
            let frame = self
                .frames
                .get_mut(pfn)
                .ok_or(FatalError::FrameOutOfRange { pfn })?;
            let keep = if frame.is_reserved() {
                PageFlags::RESERVED
            } else {
                PageFlags::EMPTY
            };
            frame.set_flags(PageFlags::KERNEL_OWNED | keep);
            frame.set_ref_count(1);
        }

        info!(
            "Reserved kernel image and boot metadata: pfn {} - {}",
            range.start.index(),
            range.end.index()
        );
        self.boot_reserved = range;
        Ok(())
    }

    /// Set the bit of `pfn`, charging its zone if the frame was free.
    ///
    /// Returns whether the bit changed.
    fn mark_unavailable(&mut self, pfn: Pfn) -> Result<bool, FatalError> {
        if self.bitmap.set(pfn) {
            return Ok(false);
        }
        if let Some(id) = self.zones.containing(pfn) {
            self.take_free(id, pfn)?;
        }
        Ok(true)
    }

    /// Charge one frame to zone `id` and the global counter.
    pub(crate) fn take_free(&mut self, id: ZoneId, pfn: Pfn) -> Result<(), FatalError> {
        self.zones
            .get_mut(id)
            .ok_or(FatalError::FrameWithoutZone { pfn })?
            .take_free(pfn)?;
        self.huge_pages.free_2m_pages = self
            .huge_pages
            .free_2m_pages
            .checked_sub(1)
            .ok_or(FatalError::FreeCountUnderflow { pfn })?;
        Ok(())
    }

    /// Return one frame to zone `id` and the global counter.
    pub(crate) fn give_free(&mut self, id: ZoneId) {
        if let Some(zone) = self.zones.get_mut(id) {
            zone.give_free();
            self.huge_pages.free_2m_pages += 1;
        }
    }

    fn log_layout(&self) {
        let image = &self.image;
        info!(
            "Kernel image: code {:#x} - {:#x}, data end {:#x}, image end {:#x}",
            image.start_code, image.end_code, image.end_data, image.end_krnl
        );
        info!("Bitmap: {}", self.layout.bitmap());
        info!("Page frame table: {}", self.layout.frames());
        info!("Zone table: {}", self.layout.zones());
        info!("Boot metadata end: {}", self.layout.struct_end());

        if let Some(zone) = self.zones.as_slice().first() {
            let pfn = zone.start_pfn();
            debug!(
                "First zone frame {} is bitmap word {} bit {}",
                pfn.index(),
                pfn.word(),
                pfn.bit()
            );
        }
    }

    fn log_zones(&self) {
        for zone in self.zones.as_slice() {
            info!(
                "Zone{} {}: start_pfn={}, end_pfn={}, total_pages={}, nr_free={}",
                zone.id(),
                zone.zone_type(),
                zone.start_pfn().index(),
                zone.end_pfn().index(),
                zone.total_pages(),
                zone.nr_free()
            );
        }
        info!(
            "2M pages: total={}, free={}",
            self.huge_pages.total_2m_pages, self.huge_pages.free_2m_pages
        );
    }

    /// Recompute the bookkeeping from the bitmap and frame table.
    ///
    /// # Errors
    /// The first inconsistency found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for zone in self.zones.as_slice() {
            let actual = self.bitmap.count_clear(zone.pfn_range()) as u64;
            if actual != zone.nr_free() {
                return Err(InvariantViolation::FreeCountMismatch {
                    zone: zone.id(),
                    recorded: zone.nr_free(),
                    actual,
                });
            }
        }

        for frame in self.frames.iter() {
            let pfn = frame.pfn();
            if pfn.index() == 0 || self.zones.containing(pfn).is_some() {
                continue;
            }
            if !frame.is_reserved() || !self.bitmap.is_set(pfn) {
                return Err(InvariantViolation::UnreservedOutsideZones { pfn });
            }
        }

        let actual = self.zones.free_pages();
        if actual != self.huge_pages.free_2m_pages {
            return Err(InvariantViolation::GlobalFreeMismatch {
                recorded: self.huge_pages.free_2m_pages,
                actual,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn frame(&self, pfn: Pfn) -> Option<&PageFrame> {
        self.frames.get(pfn)
    }

    #[must_use]
    pub const fn frames(&self) -> &FrameTable<'m> {
        &self.frames
    }

    /// Frames owned by zone `id`.
    #[must_use]
    pub fn zone_frames(&self, id: ZoneId) -> Option<&[PageFrame]> {
        self.frames.slice(self.zones.get(id)?.pfn_range())
    }

    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        self.zones.as_slice()
    }

    #[must_use]
    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(id)
    }

    #[must_use]
    pub const fn bitmap(&self) -> &Bitmap<'m> {
        &self.bitmap
    }

    #[must_use]
    pub const fn memory_map(&self) -> &E820Table {
        &self.memory_map
    }

    #[must_use]
    pub const fn summary(&self) -> &MemoryMapSummary {
        &self.summary
    }

    #[must_use]
    pub const fn layout(&self) -> &MetadataLayout {
        &self.layout
    }

    #[must_use]
    pub const fn huge_pages(&self) -> HugePageInfo {
        self.huge_pages
    }

    #[must_use]
    pub const fn kernel_image(&self) -> &KernelImage {
        &self.image
    }

    #[must_use]
    pub const fn max_pfn(&self) -> Pfn {
        self.summary.max_pfn()
    }

    /// Frames reserved for the kernel image and boot metadata.
    #[must_use]
    pub fn boot_reserved(&self) -> Range<Pfn> {
        self.boot_reserved.clone()
    }

    /// Physical base of `pfn`, if the frame is tracked.
    #[must_use]
    pub fn frame_address(&self, pfn: Pfn) -> Option<PhysicalAddress> {
        (pfn < self.frames.end()).then(|| pfn.start_address())
    }
}

impl fmt::Debug for PhysicalMemoryManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalMemoryManager")
            .field("max_pfn", &self.summary.max_pfn())
            .field("zones", &self.zones)
            .field("huge_pages", &self.huge_pages)
            .field("boot_reserved", &self.boot_reserved)
            .finish_non_exhaustive()
    }
}
