//! # Memory Layout

/// Base of the higher-half direct map.
///
/// Physical address `pa` is visible to the kernel at `HHDM_BASE + pa`, which
/// is the only physical↔virtual translation the early memory code relies on.
pub const HHDM_BASE: u64 = 0xffff_8000_0000_0000;

/// Virtual address of the boot memory map buffer.
///
/// The real-mode stage stores the E820 map at physical `0x7e00`: a
/// little-endian `u32` entry count immediately followed by packed
/// [`RawE820Entry`](crate::boot::RawE820Entry) records.
pub const BOOT_MEMORY_MAP_ADDR: u64 = HHDM_BASE + BOOT_MEMORY_MAP_PHYS;

/// Physical address of the boot memory map buffer.
pub const BOOT_MEMORY_MAP_PHYS: u64 = 0x7e00;

/// Where the loader places the kernel image in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

const _: () = {
    assert!(BOOT_MEMORY_MAP_PHYS < PHYS_LOAD);
    assert!(BOOT_MEMORY_MAP_PHYS.is_multiple_of(4));
    assert!(PHYS_LOAD.is_multiple_of(4096));
};
