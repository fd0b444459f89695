#![allow(dead_code)]

use kernel_info::boot::{KernelImage, RawE820Entry};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_pmm::{E820Table, FatalError, OffsetPhysMapper, PhysicalMemoryManager, Pfn};

pub const MIB: u64 = 1024 * 1024;

/// Usable RAM.
pub const RAM: u32 = 1;
/// Firmware reserved.
pub const RESERVED: u32 = 2;

/// Bytes of the fake kernel image in front of the backing buffer.
pub const IMAGE_SIZE: u64 = 0x8000;

/// Heap memory standing in for the RAM right behind the kernel image.
pub struct Backing(Vec<u64>);

impl Backing {
    pub fn new() -> Self {
        Self(vec![0; 64 * 1024])
    }

    fn base(&mut self) -> VirtualAddress {
        VirtualAddress::from_ptr(self.0.as_mut_ptr())
    }
}

pub fn map(entries: &[(u64, u64, u32)]) -> E820Table {
    E820Table::from_raw(
        entries.len(),
        entries
            .iter()
            .map(|&(base, length, kind)| RawE820Entry::new(base, length, kind)),
    )
}

/// Boot a manager whose kernel image starts at physical `kernel_phys`.
///
/// The image spans [`IMAGE_SIZE`] bytes and ends where `backing` begins, so
/// the metadata lands inside `backing`.
pub fn try_boot<'a>(
    backing: &'a mut Backing,
    memory_map: E820Table,
    kernel_phys: u64,
) -> Result<PhysicalMemoryManager<'a>, FatalError> {
    let end_krnl = backing.base();
    let start_code = VirtualAddress::new(end_krnl.as_u64() - IMAGE_SIZE);
    let image = KernelImage {
        start_code: start_code.as_u64(),
        end_code: start_code.as_u64() + IMAGE_SIZE / 2,
        end_data: start_code.as_u64() + IMAGE_SIZE * 3 / 4,
        end_krnl: end_krnl.as_u64(),
    };
    let mapper = OffsetPhysMapper::aliasing(start_code, PhysicalAddress::new(kernel_phys));

    unsafe { PhysicalMemoryManager::new(memory_map, image, &mapper) }
}

pub fn boot<'a>(
    backing: &'a mut Backing,
    memory_map: E820Table,
    kernel_phys: u64,
) -> PhysicalMemoryManager<'a> {
    let pmm = try_boot(backing, memory_map, kernel_phys).expect("boot");
    assert_consistent(&pmm);
    pmm
}

fn bit(words: &[u64], pfn: usize) -> bool {
    words[pfn / 64] & (1 << (pfn % 64)) != 0
}

/// Re-derive the bookkeeping from the raw bitmap words and compare.
pub fn assert_consistent(pmm: &PhysicalMemoryManager<'_>) {
    let words = pmm.bitmap().words();
    let frame_count = pmm.frames().len();

    let mut zone_free = 0;
    for zone in pmm.zones() {
        let clear = (zone.start_pfn().index()..zone.end_pfn().index())
            .filter(|&pfn| !bit(words, pfn))
            .count() as u64;
        assert_eq!(clear, zone.nr_free(), "nr_free of zone {}", zone.id());
        zone_free += clear;
    }
    assert_eq!(pmm.huge_pages().free_2m_pages(), zone_free);

    for pfn in 1..frame_count {
        let inside = pmm.zones().iter().any(|z| z.contains(Pfn::new(pfn)));
        if inside {
            continue;
        }
        let frame = pmm.frame(Pfn::new(pfn)).expect("tracked frame");
        assert!(frame.is_reserved(), "pfn {pfn} outside zones not reserved");
        assert!(bit(words, pfn), "pfn {pfn} outside zones not set");
    }

    assert_eq!(pmm.check_invariants(), Ok(()));
}

/// Copy of the bitmap words.
pub fn snapshot(pmm: &PhysicalMemoryManager<'_>) -> Vec<u64> {
    pmm.bitmap().words().to_vec()
}

pub fn is_set(pmm: &PhysicalMemoryManager<'_>, pfn: usize) -> bool {
    bit(pmm.bitmap().words(), pfn)
}
