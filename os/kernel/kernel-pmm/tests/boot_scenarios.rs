mod common;

use common::{Backing, MIB, RAM, RESERVED, assert_consistent, boot, is_set, map, try_boot};
use kernel_info::boot::{KernelImage, RawE820Entry};
use kernel_info::memory::{BOOT_MEMORY_MAP_PHYS, PHYS_LOAD};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_pmm::{
    Bitmap, E820Kind, FatalError, FreeError, OffsetPhysMapper, PageFlags, PhysMapper, Pfn, Zone,
    ZoneId, ZoneSpan, ZoneType, boot as pmm_boot, plan_zones,
};

fn span(start: usize, end: usize, zone_type: ZoneType) -> ZoneSpan {
    ZoneSpan {
        start_pfn: Pfn::new(start),
        end_pfn: Pfn::new(end),
        zone_type,
    }
}

#[test]
fn single_32mib_region_splits_at_16mib() {
    let memory_map = map(&[(0, 32 * MIB, RAM)]);

    // Before any reservation.
    let plan = plan_zones(&memory_map, Pfn::new(16)).expect("plan");
    assert_eq!(
        plan.as_slice(),
        &[span(0, 8, ZoneType::Dma), span(8, 16, ZoneType::Normal)]
    );
    for (i, s) in plan.iter().enumerate() {
        let zone = Zone::from_span(ZoneId::new(i as u32), s);
        assert_eq!(zone.total_pages(), 8);
        assert_eq!(zone.nr_free(), 8);
    }

    let mut backing = Backing::new();
    let pmm = boot(&mut backing, memory_map, PHYS_LOAD);

    assert_eq!(pmm.max_pfn(), Pfn::new(16));
    assert_eq!(pmm.frames().len(), 17);
    assert_eq!(pmm.zones().len(), 2);

    let dma = pmm.zone(ZoneId::new(0)).expect("dma");
    assert_eq!(dma.zone_type(), ZoneType::Dma);
    assert_eq!(dma.pfn_range(), Pfn::new(0)..Pfn::new(8));
    assert_eq!(dma.total_pages(), 8);
    // Frame 0 holds the kernel image and the boot metadata.
    assert_eq!(dma.nr_free(), 7);

    let normal = pmm.zone(ZoneId::new(1)).expect("normal");
    assert_eq!(normal.zone_type(), ZoneType::Normal);
    assert_eq!(normal.pfn_range(), Pfn::new(8)..Pfn::new(16));
    assert_eq!(normal.nr_free(), 8);

    assert_eq!(pmm.huge_pages().total_2m_pages(), 16);
    assert_eq!(pmm.huge_pages().free_2m_pages(), 15);
    assert_eq!(pmm.boot_reserved(), Pfn::new(0)..Pfn::new(1));

    let frame0 = pmm.frame(Pfn::new(0)).expect("frame 0");
    assert_eq!(frame0.flags(), PageFlags::KERNEL_OWNED);
    assert_eq!(frame0.ref_count(), 1);
    assert_eq!(frame0.zone(), Some(ZoneId::new(0)));
    assert!(is_set(&pmm, 0));

    let last = pmm.frame(Pfn::new(16)).expect("frame 16");
    assert_eq!(last.zone(), None);
    assert!(last.is_reserved());
    assert!(is_set(&pmm, 16));

    assert_eq!(
        pmm.frame_address(Pfn::new(8)),
        Some(PhysicalAddress::new(16 * MIB))
    );
    assert_eq!(pmm.frame_address(Pfn::new(17)), None);
}

#[test]
fn metadata_is_packed_behind_the_image() {
    let mut backing = Backing::new();
    let pmm = boot(&mut backing, map(&[(0, 32 * MIB, RAM)]), PHYS_LOAD);
    let layout = pmm.layout();

    let end_krnl = VirtualAddress::new(pmm.kernel_image().end_krnl);
    assert_eq!(layout.bitmap().start(), end_krnl.align_up::<Size4K>());
    assert_eq!(layout.bitmap().size(), 8 * Bitmap::words_for(17) as u64);
    assert_eq!(layout.frames().start(), layout.bitmap().end().align_up::<Size4K>());
    assert_eq!(layout.zones().start(), layout.frames().end().align_up::<Size4K>());
    assert_eq!(layout.zone_slots(), 2);
    assert_eq!(layout.struct_end().as_u64() % 64, 0);

    // Every frame touched by the image or the metadata is reserved.
    let mapper = OffsetPhysMapper::aliasing(
        VirtualAddress::new(pmm.kernel_image().start_code),
        PhysicalAddress::new(PHYS_LOAD),
    );
    let last_byte = mapper.virt_to_phys(VirtualAddress::new(layout.struct_end().as_u64() - 1));
    assert!(pmm.boot_reserved().contains(&Pfn::containing(last_byte)));
    assert!(pmm.boot_reserved().contains(&Pfn::containing(PhysicalAddress::new(PHYS_LOAD))));
}

#[test]
fn typical_pc_memory_map() {
    let memory_map = map(&[
        (0, 0x9_FC00, RAM),
        (0x9_FC00, 0x400, RESERVED),
        (0xF_0000, 0x1_0000, RESERVED),
        (0x10_0000, 0x7FEE_0000, RAM),
        (0x7FFE_0000, 0x2_0000, RESERVED),
        (0xFFFC_0000, 0x4_0000, RESERVED),
    ]);

    let mut backing = Backing::new();
    let pmm = boot(&mut backing, memory_map, PHYS_LOAD);

    assert_eq!(pmm.memory_map().len(), 6);
    assert_eq!(
        pmm.memory_map().get(2).map(|e| e.kind()),
        Some(E820Kind::Reserved)
    );
    assert_eq!(pmm.max_pfn(), Pfn::new(2048));

    let zones = pmm.zones();
    assert_eq!(zones.len(), 2);
    assert_eq!(zones[0].pfn_range(), Pfn::new(1)..Pfn::new(8));
    assert_eq!(zones[0].nr_free(), 7);
    assert_eq!(zones[1].pfn_range(), Pfn::new(8)..Pfn::new(1023));
    assert_eq!(zones[1].nr_free(), 1015);
    assert_eq!(pmm.huge_pages().total_2m_pages(), 1022);
    assert_eq!(pmm.huge_pages().free_2m_pages(), 1022);

    // Frame 0 is outside every zone but attached to the first one, and the
    // kernel image at 1 MiB lives in it.
    let frame0 = pmm.frame(Pfn::new(0)).expect("frame 0");
    assert_eq!(frame0.zone(), Some(ZoneId::new(0)));
    assert!(frame0.flags().kernel());
    assert!(is_set(&pmm, 0));

    for pfn in 1023..=2048 {
        let frame = pmm.frame(Pfn::new(pfn)).expect("tracked");
        assert!(frame.is_reserved());
        assert_eq!(frame.zone(), None);
    }
}

#[test]
fn kernel_straddling_a_frame_boundary_reserves_both_frames() {
    let mut backing = Backing::new();
    let mut pmm = boot(&mut backing, map(&[(0, 64 * MIB, RAM)]), 18 * MIB - 0x4000);

    assert_eq!(pmm.boot_reserved(), Pfn::new(8)..Pfn::new(10));
    assert_eq!(pmm.zones()[0].nr_free(), 8);
    assert_eq!(pmm.zones()[1].nr_free(), 22);

    for pfn in [8, 9] {
        let frame = pmm.frame(Pfn::new(pfn)).expect("tracked");
        assert_eq!(frame.flags(), PageFlags::KERNEL_OWNED);
        assert_eq!(frame.ref_count(), 1);
        assert_eq!(frame.zone(), Some(ZoneId::new(1)));
    }

    assert_eq!(
        pmm.free_pages(Pfn::new(8), 1),
        Err(FreeError::KernelOwned { pfn: Pfn::new(8) })
    );
    assert_eq!(
        pmm.alloc_pages(ZoneType::Normal, 1, PageFlags::PRESENT),
        Ok(Pfn::new(10))
    );
    assert_consistent(&pmm);
}

#[test]
fn firmware_hole_inside_a_zone_is_charged() {
    let memory_map = map(&[(0, 64 * MIB, RAM), (20 * MIB, 4 * MIB, RESERVED)]);
    let mut backing = Backing::new();
    let mut pmm = boot(&mut backing, memory_map, PHYS_LOAD);

    let normal = pmm.zone(ZoneId::new(1)).expect("normal");
    assert_eq!(normal.total_pages(), 24);
    assert_eq!(normal.nr_free(), 22);

    let hole = pmm.frame(Pfn::new(10)).expect("tracked");
    assert!(hole.is_reserved());
    assert!(!hole.is_used());
    assert!(is_set(&pmm, 10) && is_set(&pmm, 11));

    assert_eq!(
        pmm.free_pages(Pfn::new(10), 1),
        Err(FreeError::NotAllocated { pfn: Pfn::new(10) })
    );

    // Candidates at 8 and 11 hit the hole; the search strides to 14 and steps
    // over the free run at 12.
    assert_eq!(
        pmm.alloc_pages(ZoneType::Normal, 3, PageFlags::PRESENT),
        Ok(Pfn::new(14))
    );
    assert_consistent(&pmm);
}

#[test]
fn frame_zero_is_released_despite_firmware_reservation() {
    let memory_map = map(&[(0, 2 * MIB, RESERVED), (2 * MIB, 62 * MIB, RAM)]);
    let mut backing = Backing::new();
    let pmm = boot(&mut backing, memory_map, 4 * MIB);

    let frame0 = pmm.frame(Pfn::new(0)).expect("frame 0");
    assert_eq!(frame0.zone(), Some(ZoneId::new(0)));
    assert!(frame0.flags().is_empty());
    assert!(!is_set(&pmm, 0));

    // Not inside the DMA zone, so it does not count as a free page there.
    let dma = pmm.zone(ZoneId::new(0)).expect("dma");
    assert_eq!(dma.pfn_range(), Pfn::new(1)..Pfn::new(8));
    assert_eq!(pmm.boot_reserved(), Pfn::new(2)..Pfn::new(3));
    assert_eq!(dma.nr_free(), 6);
}

#[test]
fn frame_zero_outside_the_first_zone_is_never_charged() {
    let memory_map = map(&[(0, 2 * MIB, RESERVED), (2 * MIB, 62 * MIB, RAM)]);
    let mut backing = Backing::new();
    let mut pmm = boot(&mut backing, memory_map, 4 * MIB);
    let before = pmm.huge_pages();

    pmm.page_init(Pfn::new(0), PageFlags::PRESENT).expect("page_init");

    let frame0 = pmm.frame(Pfn::new(0)).expect("frame 0");
    assert!(frame0.is_used());
    assert_eq!(frame0.zone(), Some(ZoneId::new(0)));
    assert_eq!(pmm.zone(ZoneId::new(0)).map(Zone::nr_free), Some(6));
    assert_eq!(pmm.huge_pages(), before);
    assert_consistent(&pmm);
}

#[test]
fn overlapping_usable_entries_do_not_share_frames() {
    let memory_map = map(&[(0, 48 * MIB, RAM), (32 * MIB, 32 * MIB, RAM)]);
    let mut backing = Backing::new();
    let mut pmm = boot(&mut backing, memory_map, PHYS_LOAD);

    let ranges: Vec<_> = pmm.zones().iter().map(Zone::pfn_range).collect();
    assert_eq!(
        ranges,
        [
            Pfn::new(0)..Pfn::new(8),
            Pfn::new(8)..Pfn::new(24),
            Pfn::new(24)..Pfn::new(32)
        ]
    );
    assert_eq!(pmm.huge_pages().total_2m_pages(), 32);
    assert_eq!(pmm.frame(Pfn::new(20)).and_then(|f| f.zone()), Some(ZoneId::new(1)));
    assert_eq!(pmm.frame(Pfn::new(24)).and_then(|f| f.zone()), Some(ZoneId::new(2)));

    // 16..24 is listed by both entries and belongs to zone 1 only.
    assert_eq!(
        pmm.alloc_pages(ZoneType::Normal, 12, PageFlags::PRESENT),
        Ok(Pfn::new(8))
    );
    assert_eq!(
        pmm.alloc_pages(ZoneType::Normal, 8, PageFlags::PRESENT),
        Ok(Pfn::new(24))
    );
    assert_eq!(
        pmm.alloc_pages(ZoneType::Normal, 4, PageFlags::PRESENT),
        Ok(Pfn::new(20))
    );
    assert_eq!(pmm.zone(ZoneId::new(1)).map(Zone::nr_free), Some(0));
    assert_eq!(pmm.zone(ZoneId::new(2)).map(Zone::nr_free), Some(0));
    assert_consistent(&pmm);

    pmm.free_pages(Pfn::new(16), 8).expect("free");
    assert_eq!(pmm.zone(ZoneId::new(1)).map(Zone::nr_free), Some(8));
    assert_eq!(pmm.zone(ZoneId::new(2)).map(Zone::nr_free), Some(0));
    assert_consistent(&pmm);
}

#[test]
fn map_without_usable_frames_is_fatal() {
    let mut backing = Backing::new();
    let tiny = map(&[(0, 0x9_FC00, RAM), (0x9_FC00, 0x400, RESERVED)]);
    assert_eq!(
        try_boot(&mut backing, tiny, PHYS_LOAD).err(),
        Some(FatalError::NoUsableMemory)
    );

    let mut backing = Backing::new();
    assert_eq!(
        try_boot(&mut backing, map(&[]), PHYS_LOAD).err(),
        Some(FatalError::NoUsableMemory)
    );
}

#[test]
fn oversized_map_is_truncated_and_still_boots() {
    let raw: Vec<_> = (0..70u64)
        .map(|i| RawE820Entry::new(i * 4 * MIB, 4 * MIB, RAM))
        .collect();
    let memory_map = kernel_pmm::E820Table::from_raw(raw.len(), raw);
    assert!(memory_map.is_truncated());

    let mut backing = Backing::new();
    let pmm = boot(&mut backing, memory_map, PHYS_LOAD);

    assert_eq!(pmm.memory_map().len(), 64);
    assert_eq!(pmm.memory_map().reported_len(), 70);
    assert_eq!(pmm.max_pfn(), Pfn::new(128));
    assert_eq!(pmm.zones().len(), 64);
    assert_eq!(pmm.layout().zone_slots(), 65);
    assert_eq!(
        pmm.zones()
            .iter()
            .filter(|z| z.zone_type() == ZoneType::Dma)
            .count(),
        4
    );
    assert_eq!(pmm.huge_pages().total_2m_pages(), 128);
    assert_eq!(pmm.huge_pages().free_2m_pages(), 127);
}

#[test]
fn zones_are_identical_across_boots() {
    let entries = [
        (0, 0x9_FC00, RAM),
        (0x10_0000, 127 * MIB, RAM),
        (128 * MIB, MIB, RESERVED),
        (256 * MIB, 256 * MIB, RAM),
    ];

    let mut first = Backing::new();
    let a = boot(&mut first, map(&entries), PHYS_LOAD);
    let mut second = Backing::new();
    let b = boot(&mut second, map(&entries), PHYS_LOAD);

    assert_eq!(a.zones(), b.zones());
    assert_eq!(a.huge_pages(), b.huge_pages());
}

#[test]
fn init_memory_reads_the_boot_buffer() {
    let mut bytes = 1u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&RawE820Entry::new(0, 32 * MIB, RAM).to_le_bytes());

    // The buffer stays mapped for the rest of the test run.
    let memory: *mut u64 = Vec::leak(vec![0u64; 64 * 1024]).as_mut_ptr();
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), memory.cast::<u8>(), bytes.len()) };

    let base = VirtualAddress::from_ptr(memory);
    let mapper = OffsetPhysMapper::aliasing(base, PhysicalAddress::new(BOOT_MEMORY_MAP_PHYS));
    let image = KernelImage {
        start_code: base.as_u64() + 0x1000,
        end_code: base.as_u64() + 0x1800,
        end_data: base.as_u64() + 0x1C00,
        end_krnl: base.as_u64() + 0x2000,
    };

    let pmm = unsafe { pmm_boot::init_memory(&mapper, image) }.expect("init");
    assert_eq!(pmm.memory_map().len(), 1);
    assert_eq!(pmm.zones().len(), 2);
    assert_eq!(pmm.boot_reserved(), Pfn::new(0)..Pfn::new(1));
    assert_consistent(&pmm);
}
